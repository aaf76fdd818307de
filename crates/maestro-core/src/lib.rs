// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod context;
mod coordinator;
mod delegate;
mod events;
mod improve;
mod orchestrator;
mod prompts;
mod runner;
mod selector;
mod session;

pub use context::{ContextManager, ContextStats};
pub use coordinator::{SubagentCoordinator, SubagentResult, SubagentRunner, SubagentTask};
pub use delegate::DelegateTool;
pub use events::{AgentEvent, RunOutcome, RunStatus};
pub use improve::{extract_keywords, ImproveHooks, LogInsights};
pub use orchestrator::Orchestrator;
pub use prompts::{build_system_prompt, ORCHESTRATOR_PROMPT, SPECIALIST_PROMPT};
pub use runner::{run_sampling_loop, RunRequest, RunnerDeps};
pub use selector::{Selection, SmartSelector, TaskType};
pub use session::{CancelToken, LiveSession};
