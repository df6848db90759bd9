//! Agent state machine.
//!
//! The active cycle is thinking, executing, evaluating. `Paging` is accepted as
//! a hint but resolves straight back to thinking.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Thinking,
    Executing,
    Evaluating,
    Paging,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Thinking => "thinking",
            AgentState::Executing => "executing",
            AgentState::Evaluating => "evaluating",
            AgentState::Paging => "paging",
        }
    }

    /// State after an iteration that executed at least one action block.
    pub fn after_actions() -> Self {
        AgentState::Evaluating
    }

    /// State after an iteration without actions, honoring a valid hint.
    pub fn after_idle(hint: Option<&str>) -> Self {
        hint.and_then(|raw| raw.parse::<AgentState>().ok())
            .unwrap_or_default()
            .settle()
    }

    /// Collapse reserved states onto the state that actually runs.
    pub fn settle(self) -> Self {
        match self {
            AgentState::Paging => AgentState::Thinking,
            other => other,
        }
    }
}

impl FromStr for AgentState {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "thinking" => Ok(AgentState::Thinking),
            "executing" => Ok(AgentState::Executing),
            "evaluating" => Ok(AgentState::Evaluating),
            "paging" => Ok(AgentState::Paging),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_defaults_to_thinking() {
        assert_eq!(AgentState::after_idle(None), AgentState::Thinking);
        assert_eq!(AgentState::after_idle(Some("dreaming")), AgentState::Thinking);
    }

    #[test]
    fn idle_honors_hint() {
        assert_eq!(
            AgentState::after_idle(Some(" Evaluating ")),
            AgentState::Evaluating
        );
        assert_eq!(AgentState::after_idle(Some("executing")), AgentState::Executing);
    }

    #[test]
    fn paging_passes_through_to_thinking() {
        assert_eq!(AgentState::after_idle(Some("paging")), AgentState::Thinking);
        assert_eq!(AgentState::Paging.settle(), AgentState::Thinking);
    }

    #[test]
    fn actions_lead_to_evaluating() {
        assert_eq!(AgentState::after_actions(), AgentState::Evaluating);
    }
}
