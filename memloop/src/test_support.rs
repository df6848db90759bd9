//! Test-only collaborators and document builders.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::io::config::{AgentConfig, write_config};
use crate::io::init::{InitOptions, MemloopPaths, init_memloop};
use crate::io::llm::LlmClient;
use crate::io::persistence::{JsonFilePersistence, Persistence, RunState};
use crate::tree::Node;

/// Build a document from a JSON literal.
pub fn doc(value: serde_json::Value) -> Node {
    Node::from(value)
}

/// Wrap a list of `(kind, target, content)` triples as action blocks.
pub fn action_blocks(actions: &[(&str, &str, Option<&str>)]) -> String {
    actions
        .iter()
        .map(|(kind, target, content)| {
            let content = content
                .map(|c| format!("<content>{c}</content>"))
                .unwrap_or_default();
            format!(
                "<action><kind>{kind}</kind><target_path>{target}</target_path>{content}</action>"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Model client replaying a fixed queue of responses.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: RefCell<VecDeque<Result<String>>>,
    prompts: RefCell<Vec<String>>,
    calls: Cell<usize>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
            calls: Cell::new(0),
        }
    }

    /// Convenience for clients that only ever succeed.
    pub fn replying<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl LlmClient for ScriptedClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.set(self.calls.get() + 1);
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted response left")))
    }
}

#[derive(Debug, Default)]
struct Stored {
    working: Option<Node>,
    persistent: Option<Node>,
    run_state: Option<RunState>,
    fail_loads: bool,
    fail_saves: bool,
}

/// In-memory persistence. Clones share the same storage, so a test can keep a
/// handle while the orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    inner: Rc<RefCell<Stored>>,
}

impl MemoryPersistence {
    pub fn with_documents(working: Node, persistent: Node) -> Self {
        let store = Self::default();
        {
            let mut inner = store.inner.borrow_mut();
            inner.working = Some(working);
            inner.persistent = Some(persistent);
        }
        store
    }

    pub fn fail_saves(&self, fail: bool) {
        self.inner.borrow_mut().fail_saves = fail;
    }

    pub fn fail_loads(&self, fail: bool) {
        self.inner.borrow_mut().fail_loads = fail;
    }

    pub fn saved_working(&self) -> Option<Node> {
        self.inner.borrow().working.clone()
    }

    pub fn saved_persistent(&self) -> Option<Node> {
        self.inner.borrow().persistent.clone()
    }

    pub fn saved_run_state(&self) -> Option<RunState> {
        self.inner.borrow().run_state.clone()
    }

    fn check_load(&self) -> Result<()> {
        if self.inner.borrow().fail_loads {
            return Err(anyhow!("scripted load failure"));
        }
        Ok(())
    }

    fn check_save(&self) -> Result<()> {
        if self.inner.borrow().fail_saves {
            return Err(anyhow!("scripted save failure"));
        }
        Ok(())
    }
}

impl Persistence for MemoryPersistence {
    fn load_working(&self) -> Result<Node> {
        self.check_load()?;
        Ok(self
            .inner
            .borrow()
            .working
            .clone()
            .unwrap_or_else(Node::empty_container))
    }

    fn load_persistent(&self) -> Result<Node> {
        self.check_load()?;
        Ok(self
            .inner
            .borrow()
            .persistent
            .clone()
            .unwrap_or_else(Node::empty_container))
    }

    fn save_working(&self, doc: &Node) -> Result<()> {
        self.check_save()?;
        self.inner.borrow_mut().working = Some(doc.clone());
        Ok(())
    }

    fn save_persistent(&self, doc: &Node) -> Result<()> {
        self.check_save()?;
        self.inner.borrow_mut().persistent = Some(doc.clone());
        Ok(())
    }

    fn load_run_state(&self) -> Result<RunState> {
        self.check_load()?;
        Ok(self.inner.borrow().run_state.clone().unwrap_or_default())
    }

    fn save_run_state(&self, state: &RunState) -> Result<()> {
        self.check_save()?;
        self.inner.borrow_mut().run_state = Some(state.clone());
        Ok(())
    }
}

/// Initialized project in a temporary directory, removed on drop.
#[derive(Debug)]
pub struct TestProject {
    dir: tempfile::TempDir,
    paths: MemloopPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = init_memloop(dir.path(), &InitOptions { force: false })?;
        Ok(Self { dir, paths })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> &MemloopPaths {
        &self.paths
    }

    pub fn persistence(&self) -> JsonFilePersistence {
        self.paths.persistence()
    }

    pub fn write_config(&self, cfg: &AgentConfig) -> Result<()> {
        write_config(&self.paths.config_path, cfg)
    }

    pub fn write_working(&self, doc: &Node) -> Result<()> {
        self.persistence().save_working(doc)
    }

    pub fn write_persistent(&self, doc: &Node) -> Result<()> {
        self.persistence().save_persistent(doc)
    }
}
