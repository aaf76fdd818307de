// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use maestro_config::{ModelTier, ThinkingBudget};

/// Terminal state of a sampling-loop run (plus the two live states).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    CapReached,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::CapReached => "cap_reached",
            Self::Error => "error",
        }
    }
}

/// What one sampling-loop run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Model calls issued.
    pub iterations: u32,
    /// Tool names dispatched, in order (repeats included).
    pub tools_used: Vec<String>,
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Events emitted by the sampling loop for observers (CLI, orchestrator).
/// The UI consumes session snapshots over SSE instead; these are the
/// fine-grained internal stream.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    RunStarted {
        session_id: String,
    },
    ModelCallStarted {
        iteration: u32,
        tier: ModelTier,
        thinking: ThinkingBudget,
    },
    AssistantText(String),
    ToolCallStarted {
        call_id: String,
        name: String,
    },
    ToolCallFinished {
        call_id: String,
        name: String,
        is_error: bool,
    },
    /// The same tool produced an identical error on consecutive turns.
    RepeatedToolError {
        name: String,
        error_class: String,
        count: u32,
    },
    ContextCompacted {
        images_removed: usize,
    },
    Warning(String),
    RunFinished {
        status: RunStatus,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_classified() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::CapReached.is_terminal());
        assert!(RunStatus::Error.is_terminal());
        assert!(!RunStatus::Idle.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn status_serialises_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::CapReached).unwrap(),
            "\"cap_reached\""
        );
        assert_eq!(RunStatus::CapReached.as_str(), "cap_reached");
    }
}
