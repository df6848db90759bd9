//! Iteration logging helpers for `.memloop/iterations/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::state::AgentState;
use crate::core::types::RecordSummary;

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub iteration: u64,
    pub state_before: AgentState,
    pub state_after: AgentState,
    pub actions: usize,
    pub rejected: usize,
    pub evicted: usize,
    pub fatal: Option<String>,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub results_path: PathBuf,
}

impl IterationPaths {
    pub fn new(iterations_dir: &Path, iteration: u64) -> Self {
        let dir = iterations_dir.join(iteration.to_string());
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.txt"),
            results_path: dir.join("results.json"),
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub iterations_dir: &'a Path,
    pub meta: &'a IterationMeta,
    pub prompt: &'a str,
    /// Absent when the model call itself failed.
    pub response: Option<&'a str>,
    pub records: &'a [RecordSummary],
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<IterationPaths> {
    let paths = IterationPaths::new(request.iterations_dir, request.meta.iteration);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep logs stable.
    write_json(&paths.meta_path, request.meta)?;
    write_text(&paths.prompt_path, request.prompt)?;
    if let Some(response) = request.response {
        write_text(&paths.response_path, response)?;
    }
    write_json(&paths.results_path, &request.records)?;

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
