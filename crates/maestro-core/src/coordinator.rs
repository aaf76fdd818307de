// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use maestro_config::CoordinatorConfig;

use crate::session::CancelToken;

/// One specialist invocation handed to the coordinator.
#[derive(Debug, Clone)]
pub struct SubagentTask {
    pub task_id: String,
    pub role: String,
    pub prompt: String,
    /// The only caller context the subagent sees — never the full
    /// transcript.
    pub context_snippet: Option<String>,
    /// Delegation recursion depth of the *caller*; the subagent runs at
    /// depth + 1.
    pub depth: u32,
}

/// What a subagent hands back: a compact summary, never its inner context.
#[derive(Debug, Clone)]
pub struct SubagentResult {
    pub task_id: String,
    pub success: bool,
    pub summary: String,
    pub artifacts_ref: Option<String>,
}

impl SubagentResult {
    pub fn failure(task_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            summary: summary.into(),
            artifacts_ref: None,
        }
    }
}

/// Executes one subagent task in an isolated context (its own session,
/// messages, and tool state).  Implemented by the orchestrator wiring; the
/// coordinator only schedules.
#[async_trait]
pub trait SubagentRunner: Send + Sync {
    async fn run(&self, task: SubagentTask) -> anyhow::Result<SubagentResult>;
}

/// Bounded-parallel dispatch of specialist agents.
///
/// At most `max_concurrent` children run at once; excess tasks wait FIFO
/// (the semaphore hands permits out in acquire order).  Results come back
/// in input order regardless of completion order, one slot per task; a
/// failing child fills its own slot without cancelling siblings.
pub struct SubagentCoordinator {
    cfg: CoordinatorConfig,
    /// Shared across every `run_all` call so concurrent delegations from
    /// different agents still respect one global cap.
    semaphore: Arc<Semaphore>,
}

impl SubagentCoordinator {
    pub fn new(cfg: CoordinatorConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(cfg.max_concurrent.max(1)));
        Self { cfg, semaphore }
    }

    pub fn max_depth(&self) -> u32 {
        self.cfg.max_depth
    }

    pub async fn run_all(
        &self,
        tasks: Vec<SubagentTask>,
        runner: Arc<dyn SubagentRunner>,
        cancel: CancelToken,
    ) -> Vec<SubagentResult> {
        let n = tasks.len();
        let semaphore = self.semaphore.clone();
        let summary_cap = self.cfg.summary_cap_bytes;

        let mut handles = Vec::with_capacity(n);
        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let runner = runner.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                // A cancelled coordinator drops pending children before
                // they start.
                if cancel.is_cancelled() {
                    return (
                        index,
                        SubagentResult::failure(&task.task_id, "cancelled before start"),
                    );
                }
                let _permit = match semaphore.acquire().await {
                    Ok(p) => p,
                    Err(_) => {
                        return (
                            index,
                            SubagentResult::failure(&task.task_id, "coordinator shut down"),
                        )
                    }
                };
                if cancel.is_cancelled() {
                    return (
                        index,
                        SubagentResult::failure(&task.task_id, "cancelled before start"),
                    );
                }
                let task_id = task.task_id.clone();
                debug!(task_id = %task_id, role = %task.role, "subagent starting");
                let result = match runner.run(task).await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "subagent failed");
                        SubagentResult::failure(&task_id, format!("subagent error: {e}"))
                    }
                };
                (index, result)
            }));
        }

        let mut slots: Vec<Option<SubagentResult>> = (0..n).map(|_| None).collect();
        for handle in handles {
            match handle.await {
                Ok((index, mut result)) => {
                    truncate_summary(&mut result.summary, summary_cap);
                    slots[index] = Some(result);
                }
                Err(e) => warn!(error = %e, "subagent task panicked"),
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| SubagentResult::failure(format!("slot-{i}"), "subagent panicked"))
            })
            .collect()
    }
}

/// Bound the aggregated result size: anything over the cap is cut at a
/// char boundary with an explicit marker.
fn truncate_summary(summary: &mut String, cap: usize) {
    if summary.len() <= cap {
        return;
    }
    let mut cut = cap;
    while cut > 0 && !summary.is_char_boundary(cut) {
        cut -= 1;
    }
    summary.truncate(cut);
    summary.push_str("\n[summary truncated]");
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
