//! Orchestration for a single agent iteration.
//!
//! An [`Orchestrator`] owns both document tiers and the loop bookkeeping
//! (iteration number, next sequence index, current state). One call to
//! [`Orchestrator::step`] builds the prompt, calls the model, executes the
//! decoded actions, records their outcomes, enforces the working budget and
//! persists everything. Collaborator failures never escape a step; they are
//! recorded as `fatal` results and the next step proceeds normally.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::codec::{DecodedBatch, decode};
use crate::core::eviction::{EvictionPolicy, rotate_notes};
use crate::core::executor::{RecordStamp, Stores, apply, reject};
use crate::core::state::AgentState;
use crate::core::store::DocumentStore;
use crate::core::types::{RESULTS_KEY, RecordKind, RecordSummary, ResultRecord, Status};
use crate::io::config::{AgentConfig, load_config};
use crate::io::init::MemloopPaths;
use crate::io::iteration_log::{IterationMeta, IterationWriteRequest, write_iteration};
use crate::io::llm::LlmClient;
use crate::io::persistence::{Persistence, RunState};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::tree::Node;

/// Settings for each iteration, resolved from [`AgentConfig`].
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub prompt_budget_bytes: usize,
    pub working_max_bytes: usize,
    pub thinking_log_max_entries: usize,
    pub evaluation_log_max_entries: usize,
    pub clear_results_each_iteration: bool,
    /// Template source replacing the embedded prompt template.
    pub prompt_template: Option<String>,
    /// Where iteration artifacts go; `None` disables them.
    pub iterations_dir: Option<PathBuf>,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self::from_agent_config(&AgentConfig::default())
    }
}

impl StepConfig {
    pub fn from_agent_config(cfg: &AgentConfig) -> Self {
        Self {
            prompt_budget_bytes: cfg.prompt_budget_bytes,
            working_max_bytes: cfg.working_max_bytes,
            thinking_log_max_entries: cfg.thinking_log_max_entries,
            evaluation_log_max_entries: cfg.evaluation_log_max_entries,
            clear_results_each_iteration: cfg.clear_results_each_iteration,
            prompt_template: None,
            iterations_dir: None,
        }
    }

    /// Load `.memloop/config.toml` and resolve the template and artifact paths.
    pub fn load(paths: &MemloopPaths) -> Result<(AgentConfig, Self)> {
        if !paths.memloop_dir.is_dir() {
            return Err(anyhow!(
                "missing {} (run `memloop init` first)",
                paths.memloop_dir.display()
            ));
        }
        let cfg = load_config(&paths.config_path)?;
        let mut step = Self::from_agent_config(&cfg);
        if let Some(template) = &cfg.prompt_template {
            let path = paths.resolve(template);
            let source = fs::read_to_string(&path)
                .with_context(|| format!("read prompt template {}", path.display()))?;
            step.prompt_template = Some(source);
        }
        if cfg.record_iterations {
            step.iterations_dir = Some(paths.iterations_dir.clone());
        }
        Ok((cfg, step))
    }

    fn prompt_builder(&self) -> PromptBuilder {
        let builder = PromptBuilder::new(self.prompt_budget_bytes);
        match &self.prompt_template {
            Some(template) => builder.with_template(template.clone()),
            None => builder,
        }
    }
}

/// A collaborator failure caught at the iteration boundary.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("prompt rendering failed: {0:#}")]
    Prompt(anyhow::Error),

    #[error("model transport failed: {0:#}")]
    Transport(anyhow::Error),

    #[error("persistence failed: {0:#}")]
    Persistence(anyhow::Error),
}

/// Result of a single iteration.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Iteration number (1-indexed).
    pub iteration: u64,
    pub state_before: AgentState,
    pub state_after: AgentState,
    /// Records written this iteration, in sequence order.
    pub records: Vec<RecordSummary>,
    /// Reserved entries removed by eviction or note rotation.
    pub evicted: usize,
    /// First collaborator failure of the iteration, if any.
    pub fatal: Option<String>,
}

impl StepOutcome {
    pub fn action_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !matches!(r.kind.as_str(), "thinking" | "evaluation" | "fatal"))
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == Status::Error)
            .count()
    }

    /// One-line summary for the CLI.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "iteration {}: {} -> {}, {} action(s), {} error(s), {} evicted",
            self.iteration,
            self.state_before,
            self.state_after,
            self.action_count(),
            self.error_count(),
            self.evicted
        );
        if let Some(fatal) = &self.fatal {
            line.push_str(&format!(" [fatal: {fatal}]"));
        }
        line
    }
}

/// Drives iterations against one model client and one persistence backend.
pub struct Orchestrator<L, P> {
    llm: L,
    persistence: P,
    config: StepConfig,
    stores: Stores,
    run: RunState,
}

impl<L: LlmClient, P: Persistence> Orchestrator<L, P> {
    /// Load both documents and bookkeeping from `persistence`.
    pub fn load(llm: L, persistence: P, config: StepConfig) -> Result<Self> {
        let working = DocumentStore::new(persistence.load_working().context("load working")?)
            .context("working document root")?;
        let persistent =
            DocumentStore::new(persistence.load_persistent().context("load persistent")?)
                .context("persistent document root")?;
        let run = persistence.load_run_state().context("load run state")?;
        debug!(
            iteration = run.iteration,
            next_sequence = run.next_sequence,
            state = %run.state,
            "orchestrator loaded"
        );
        Ok(Self {
            llm,
            persistence,
            config,
            stores: Stores::new(working, persistent),
            run,
        })
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    /// Run one iteration. Never fails; collaborator errors become `fatal` records.
    #[instrument(skip_all, fields(iteration = self.run.iteration + 1, state = %self.run.state))]
    pub fn step(&mut self) -> StepOutcome {
        let started_at = timestamp();
        let clock = Instant::now();
        let iteration = self.run.iteration + 1;
        let state_before = self.run.state;
        let mut records: Vec<ResultRecord> = Vec::new();
        let mut fatal: Option<CollaboratorError> = None;
        let mut response: Option<String> = None;

        let prompt = self.build_prompt();
        let prompt_text = prompt.as_deref().unwrap_or_default().to_string();
        if self.config.clear_results_each_iteration {
            let _ = self.stores.working.remove(&[RESULTS_KEY.to_string()]);
        }

        let mut state_after = state_before;
        let mut rejected = 0;
        match prompt {
            Err(err) => fatal = Some(err),
            Ok(prompt) => match self.llm.complete(&prompt) {
                Err(err) => fatal = Some(CollaboratorError::Transport(err)),
                Ok(text) => {
                    let batch = decode(&text);
                    rejected = batch.rejected_count();
                    state_after = self.execute_batch(&batch, &mut records);
                    response = Some(text);
                }
            },
        }
        if let Some(err) = &fatal {
            warn!(error = %err, "iteration failed before execution");
            records.push(self.fatal_record(err));
        }

        self.run.iteration = iteration;
        self.run.state = state_after;
        self.record_results(&records);
        let evicted = self.enforce_budget();

        if let Err(err) = self.persist() {
            let err = CollaboratorError::Persistence(err);
            warn!(error = %err, "persisting iteration failed");
            let record = self.fatal_record(&err);
            self.record_results(std::slice::from_ref(&record));
            records.push(record);
            fatal.get_or_insert(err);
        }

        let summaries: Vec<RecordSummary> = records.iter().map(RecordSummary::from).collect();
        let outcome = StepOutcome {
            iteration,
            state_before,
            state_after,
            records: summaries,
            evicted,
            fatal: fatal.as_ref().map(ToString::to_string),
        };
        info!(
            records = outcome.records.len(),
            errors = outcome.error_count(),
            evicted,
            state_after = %state_after,
            "iteration finished"
        );

        if let Some(dir) = &self.config.iterations_dir {
            let meta = IterationMeta {
                iteration,
                state_before,
                state_after,
                actions: outcome.action_count(),
                rejected,
                evicted,
                fatal: outcome.fatal.clone(),
                started_at,
                ended_at: timestamp(),
                duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            };
            let written = write_iteration(&IterationWriteRequest {
                iterations_dir: dir,
                meta: &meta,
                prompt: &prompt_text,
                response: response.as_deref(),
                records: &outcome.records,
            });
            if let Err(err) = written {
                warn!(error = %format!("{err:#}"), "failed to write iteration artifacts");
            }
        }

        outcome
    }

    fn build_prompt(&self) -> Result<String, CollaboratorError> {
        let inputs = PromptInputs {
            iteration: self.run.iteration + 1,
            state: self.run.state,
            working: self.stores.working.root(),
            persistent: self.stores.persistent.root(),
        };
        self.config
            .prompt_builder()
            .build(&inputs)
            .map(|pack| pack.into_string())
            .map_err(CollaboratorError::Prompt)
    }

    /// Execute or reject every decoded block and add the state notes.
    fn execute_batch(&mut self, batch: &DecodedBatch, records: &mut Vec<ResultRecord>) -> AgentState {
        if !batch.has_actions() {
            if let Some(note) = &batch.thinking_log {
                records.push(self.note(RecordKind::Thinking, note));
            }
            let next = AgentState::after_idle(batch.next_state.as_deref());
            debug!(hint = ?batch.next_state, next = %next, "no actions in response");
            return next;
        }

        debug!(state = %AgentState::Executing, blocks = batch.entries.len(), "executing actions");
        for entry in &batch.entries {
            let stamp = self.next_stamp();
            let record = match entry {
                Ok(action) => apply(action, &mut self.stores, stamp),
                Err(rejected) => reject(rejected, stamp),
            };
            records.push(record);
        }
        if let Some(note) = &batch.evaluation_log {
            records.push(self.note(RecordKind::Evaluation, note));
        }
        AgentState::after_actions()
    }

    fn note(&mut self, kind: RecordKind, text: &str) -> ResultRecord {
        let stamp = self.next_stamp();
        ResultRecord {
            sequence_index: stamp.sequence_index,
            timestamp: stamp.timestamp,
            kind,
            target_path: None,
            source_path: None,
            status: Status::Ok,
            error_message: None,
            payload: Some(Node::string(text)),
        }
    }

    fn fatal_record(&mut self, err: &CollaboratorError) -> ResultRecord {
        let stamp = self.next_stamp();
        ResultRecord {
            sequence_index: stamp.sequence_index,
            timestamp: stamp.timestamp,
            kind: RecordKind::Fatal,
            target_path: None,
            source_path: None,
            status: Status::Error,
            error_message: Some(err.to_string()),
            payload: None,
        }
    }

    fn next_stamp(&mut self) -> RecordStamp {
        let sequence_index = self.run.next_sequence;
        self.run.next_sequence += 1;
        RecordStamp {
            sequence_index,
            timestamp: timestamp(),
        }
    }

    /// Store records under the reserved subtree, replacing a non-container there.
    fn record_results(&mut self, records: &[ResultRecord]) {
        let results_path = [RESULTS_KEY.to_string()];
        if let Ok(existing) = self.stores.working.get(&results_path)
            && !existing.is_container()
        {
            warn!("replacing non-container at /working/{RESULTS_KEY}");
            let _ = self.stores.working.remove(&results_path);
        }
        for record in records {
            let path = [RESULTS_KEY.to_string(), record.entry_key()];
            if let Err(err) = self.stores.working.set(&path, record.to_node()) {
                warn!(error = %err, sequence = record.sequence_index, "failed to store result");
            }
        }
    }

    /// Rotate state notes, then evict the oldest records while over budget.
    fn enforce_budget(&mut self) -> usize {
        let working = &mut self.stores.working;
        let mut removed = rotate_notes(
            working,
            &RecordKind::Thinking,
            self.config.thinking_log_max_entries,
        )
        .len();
        removed += rotate_notes(
            working,
            &RecordKind::Evaluation,
            self.config.evaluation_log_max_entries,
        )
        .len();
        let report = EvictionPolicy::new(self.config.working_max_bytes).enforce(working);
        if report.size_after > self.config.working_max_bytes {
            warn!(
                size = report.size_after,
                budget = self.config.working_max_bytes,
                "working document over budget with no results left to evict"
            );
        }
        removed + report.removed.len()
    }

    fn persist(&self) -> Result<()> {
        self.persistence
            .save_working(self.stores.working.root())
            .context("save working")?;
        self.persistence
            .save_persistent(self.stores.persistent.root())
            .context("save persistent")?;
        self.persistence
            .save_run_state(&self.run)
            .context("save run state")?;
        Ok(())
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
