//! Multi-iteration driver for `memloop run`.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::io::llm::LlmClient;
use crate::io::persistence::Persistence;
use crate::step::{Orchestrator, StepOutcome};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The stop flag was raised (SIGINT/SIGTERM).
    Interrupted,
    /// The requested number of iterations ran.
    MaxIterations { limit: u64 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Iteration number the loop started at (1-indexed).
    pub started_at_iteration: u64,
    pub steps_executed: u64,
    pub stop: LoopStop,
}

/// Run iterations until `stop` is raised or `max_iterations` steps have run.
///
/// The flag is observed only between iterations; a started iteration always
/// completes. Iteration failures are recorded by the orchestrator and never
/// end the loop.
pub fn run_loop<L, P, F>(
    orchestrator: &mut Orchestrator<L, P>,
    stop: &AtomicBool,
    max_iterations: Option<u64>,
    mut on_step: F,
) -> LoopOutcome
where
    L: LlmClient,
    P: Persistence,
    F: FnMut(&StepOutcome),
{
    let started_at_iteration = orchestrator.run_state().iteration + 1;
    let mut steps_executed = 0u64;
    loop {
        if stop.load(Ordering::Relaxed) {
            info!(steps_executed, "stop requested");
            return LoopOutcome {
                started_at_iteration,
                steps_executed,
                stop: LoopStop::Interrupted,
            };
        }
        if let Some(limit) = max_iterations
            && steps_executed >= limit
        {
            return LoopOutcome {
                started_at_iteration,
                steps_executed,
                stop: LoopStop::MaxIterations { limit },
            };
        }

        let outcome = orchestrator.step();
        steps_executed += 1;
        on_step(&outcome);
    }
}
