//! Durable storage for both documents and the loop's bookkeeping.
//!
//! The [`Persistence`] trait is the seam the orchestrator saves through; tests
//! swap in an in-memory implementation that can be told to fail.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::state::AgentState;
use crate::io::config::write_atomic;
use crate::tree::{Node, default_document};

/// Persisted bookkeeping for the loop (`.memloop/state/run_state.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunState {
    /// Iterations completed so far.
    pub iteration: u64,
    /// Sequence index the next result record will receive.
    pub next_sequence: u64,
    /// State the next iteration runs in.
    pub state: AgentState,
}

/// Load/save collaborator for the two documents and [`RunState`].
pub trait Persistence {
    fn load_working(&self) -> Result<Node>;
    fn load_persistent(&self) -> Result<Node>;
    fn save_working(&self, doc: &Node) -> Result<()>;
    fn save_persistent(&self, doc: &Node) -> Result<()>;
    fn load_run_state(&self) -> Result<RunState>;
    fn save_run_state(&self, state: &RunState) -> Result<()>;
}

/// JSON files under one state directory. Missing files load as empty documents
/// and default bookkeeping.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    pub working_path: PathBuf,
    pub persistent_path: PathBuf,
    pub run_state_path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            working_path: state_dir.join("working.json"),
            persistent_path: state_dir.join("persistent.json"),
            run_state_path: state_dir.join("run_state.json"),
        }
    }
}

impl Persistence for JsonFilePersistence {
    fn load_working(&self) -> Result<Node> {
        load_document(&self.working_path)
    }

    fn load_persistent(&self) -> Result<Node> {
        load_document(&self.persistent_path)
    }

    fn save_working(&self, doc: &Node) -> Result<()> {
        write_document(&self.working_path, doc)
    }

    fn save_persistent(&self, doc: &Node) -> Result<()> {
        write_document(&self.persistent_path, doc)
    }

    fn load_run_state(&self) -> Result<RunState> {
        let path = &self.run_state_path;
        if !path.exists() {
            return Ok(RunState::default());
        }
        debug!(path = %path.display(), "loading run state");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read run state {}", path.display()))?;
        let state: RunState = serde_json::from_str(&contents)
            .with_context(|| format!("parse run state {}", path.display()))?;
        debug!(
            iteration = state.iteration,
            next_sequence = state.next_sequence,
            "run state loaded"
        );
        Ok(state)
    }

    fn save_run_state(&self, state: &RunState) -> Result<()> {
        debug!(
            path = %self.run_state_path.display(),
            iteration = state.iteration,
            next_sequence = state.next_sequence,
            "writing run state"
        );
        write_json(&self.run_state_path, state)
    }
}

/// Load a document, requiring a JSON object at the top level.
pub fn load_document(path: &Path) -> Result<Node> {
    if !path.exists() {
        debug!(path = %path.display(), "document missing, starting empty");
        return Ok(default_document());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read document {}", path.display()))?;
    let doc: Node = serde_json::from_str(&contents)
        .with_context(|| format!("parse document {}", path.display()))?;
    if !doc.is_container() {
        return Err(anyhow!(
            "document {} must be a JSON object at the top level",
            path.display()
        ));
    }
    Ok(doc)
}

/// Atomically write a document (temp file + rename).
pub fn write_document(path: &Path, doc: &Node) -> Result<()> {
    write_json(path, doc)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}
