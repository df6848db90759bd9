//! Initialization helpers for `.memloop/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{AgentConfig, write_config};
use crate::io::persistence::{JsonFilePersistence, Persistence, RunState};
use crate::tree::{Node, default_document};

/// All canonical paths within `.memloop/` for a project root.
#[derive(Debug, Clone)]
pub struct MemloopPaths {
    pub root: PathBuf,
    pub memloop_dir: PathBuf,
    pub state_dir: PathBuf,
    pub iterations_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

impl MemloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let memloop_dir = root.join(".memloop");
        let state_dir = memloop_dir.join("state");
        Self {
            root: root.clone(),
            memloop_dir: memloop_dir.clone(),
            iterations_dir: memloop_dir.join("iterations"),
            gitignore_path: memloop_dir.join(".gitignore"),
            config_path: memloop_dir.join("config.toml"),
            state_dir,
        }
    }

    pub fn persistence(&self) -> JsonFilePersistence {
        JsonFilePersistence::new(&self.state_dir)
    }

    /// Resolve a configured path relative to the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Options for `init_memloop`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing config and documents.
    pub force: bool,
}

/// Create `.memloop/` scaffolding in `root`.
///
/// Fails if `.memloop/` already exists unless `options.force` is set.
pub fn init_memloop(root: &Path, options: &InitOptions) -> Result<MemloopPaths> {
    let paths = MemloopPaths::new(root);
    if paths.memloop_dir.exists() && !options.force {
        return Err(anyhow!(
            "memloop init: .memloop already exists (use --force to overwrite)"
        ));
    }
    if paths.memloop_dir.exists() && !paths.memloop_dir.is_dir() {
        return Err(anyhow!(
            "memloop init: .memloop exists but is not a directory"
        ));
    }

    create_dir(&paths.memloop_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.iterations_dir)?;

    fs::write(&paths.gitignore_path, MEMLOOP_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &AgentConfig::default())?;

    let persistence = paths.persistence();
    persistence.save_working(&seed_working())?;
    persistence.save_persistent(&default_document())?;
    persistence.save_run_state(&RunState::default())?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

/// Starting working document: a task placeholder for the operator to replace.
fn seed_working() -> Node {
    let mut doc = default_document();
    if let Some(children) = doc.as_container_mut() {
        children.insert("task".to_string(), Node::string(TASK_PLACEHOLDER));
    }
    doc
}

const TASK_PLACEHOLDER: &str = "Describe what the agent should work on.";
const MEMLOOP_GITIGNORE: &str = "iterations/\n";
