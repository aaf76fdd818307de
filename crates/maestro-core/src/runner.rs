// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use maestro_config::Config;
use maestro_model::{ContentBlock, Message, ModelError, ModelProvider, ModelRequest, Role};
use maestro_tools::{ToolExecutor, ToolInvocation};

use crate::{
    context::ContextManager,
    events::{AgentEvent, RunOutcome, RunStatus},
    selector::SmartSelector,
    session::{CancelToken, LiveSession},
};

/// Everything a sampling-loop run borrows from the surrounding system.
#[derive(Clone)]
pub struct RunnerDeps {
    pub provider: Arc<dyn ModelProvider>,
    pub selector: Arc<SmartSelector>,
    pub executor: Arc<ToolExecutor>,
    pub context: Arc<ContextManager>,
    pub config: Arc<Config>,
    /// Fine-grained event stream for observers; `None` for headless runs.
    pub events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl RunnerDeps {
    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// One invocation of the sampling loop.
pub struct RunRequest {
    pub session: Arc<LiveSession>,
    pub user_message: String,
    /// Fully assembled system prompt (conventions + base + policy +
    /// any retrieved knowledge).
    pub system_prompt: String,
    /// Orchestrator retry attempt, forwarded to the selector.
    pub attempt: u32,
}

/// Drive one agent conversation until the model stops requesting tools,
/// the iteration cap or deadline fires, or cancellation lands.
///
/// Invariants upheld here:
/// - the transcript is append-only, and every tool_use id gets exactly one
///   tool_result in the following user-role message — including on
///   cancellation, where undispatched calls get an error result;
/// - tools dispatch sequentially in source order, never concurrently;
/// - every tool call is logged before the next model call is issued;
/// - after cancellation is observed, no further model calls are made.
pub async fn run_sampling_loop(deps: &RunnerDeps, req: RunRequest) -> RunOutcome {
    let started = Instant::now();
    let session = req.session.clone();

    if !session.try_begin_run() {
        return RunOutcome {
            status: RunStatus::Error,
            iterations: 0,
            tools_used: Vec::new(),
            error: Some("a run is already active for this session".into()),
            duration_secs: 0.0,
        };
    }
    deps.emit(AgentEvent::RunStarted {
        session_id: session.id.clone(),
    });
    deps.executor
        .hooks()
        .fire_session(maestro_tools::HookPhase::OnSessionStart, &session.id)
        .await;

    let outcome = drive_loop(deps, &req, started).await;

    session.end_run(outcome.status, outcome.error.clone());
    deps.executor
        .hooks()
        .fire_session(maestro_tools::HookPhase::OnSessionEnd, &session.id)
        .await;
    deps.emit(AgentEvent::RunFinished {
        status: outcome.status,
    });
    outcome
}

async fn drive_loop(deps: &RunnerDeps, req: &RunRequest, started: Instant) -> RunOutcome {
    let session = &req.session;
    let cancel = session.cancel_token();
    let loop_cfg = &deps.config.loop_;
    let deadline = Duration::from_secs(loop_cfg.deadline_secs);

    let mut iterations: u32 = 0;
    let mut tools_used: Vec<String> = Vec::new();
    // (tool name, error text, consecutive count) for repeated-error detection.
    let mut last_error: Option<(String, String, u32)> = None;

    let finish = |status: RunStatus, iterations, tools_used: Vec<String>, error| RunOutcome {
        status,
        iterations,
        tools_used,
        error,
        duration_secs: started.elapsed().as_secs_f64(),
    };

    if let Err(e) = session.append_message(Message::user(&req.user_message)) {
        return finish(RunStatus::Error, 0, tools_used, Some(e.to_string()));
    }

    loop {
        if cancel.is_cancelled() {
            return finish(RunStatus::Cancelled, iterations, tools_used, None);
        }
        if iterations >= loop_cfg.iteration_cap {
            deps.emit(AgentEvent::Warning(format!(
                "iteration cap ({}) reached",
                loop_cfg.iteration_cap
            )));
            warn!(session = %session.id, cap = loop_cfg.iteration_cap, "iteration cap reached");
            return finish(RunStatus::CapReached, iterations, tools_used, None);
        }
        if started.elapsed() >= deadline {
            deps.emit(AgentEvent::Warning(format!(
                "run deadline ({}s) exceeded",
                loop_cfg.deadline_secs
            )));
            warn!(session = %session.id, "run deadline exceeded");
            return finish(RunStatus::CapReached, iterations, tools_used, None);
        }

        // Image compaction before each request keeps the payload sendable
        // without touching the durable transcript.
        let messages = session.messages();
        let images_before = deps.context.stats(&messages).image_count;
        let messages = deps.context.maybe_compact(messages);
        let images_after = deps.context.stats(&messages).image_count;
        if images_after < images_before {
            session.set_working_messages(messages.clone());
            deps.emit(AgentEvent::ContextCompacted {
                images_removed: images_before - images_after,
            });
        }

        // Route this call: content-based tier and thinking budget.
        let task_summary = latest_task_text(&messages, &req.user_message);
        let selection = deps
            .selector
            .select(&task_summary, None, req.attempt)
            .await;
        deps.emit(AgentEvent::ModelCallStarted {
            iteration: iterations + 1,
            tier: selection.tier,
            thinking: selection.thinking,
        });

        // The thinking budget counts toward the response allotment and the
        // wire contract requires budget_tokens < max_tokens, so the budget
        // is added on top of the configured output cap.
        let thinking_tokens = selection.thinking.tokens();
        let model_req = ModelRequest {
            model: deps.config.model.model_for(selection.tier).to_string(),
            system: req.system_prompt.clone(),
            messages,
            tools: deps.executor.schemas(&session.tool_group()),
            max_tokens: deps.config.model.max_tokens + thinking_tokens,
            thinking_tokens,
        };

        let response = match call_with_retry(deps, model_req, &cancel).await {
            CallResult::Ok(r) => r,
            CallResult::Cancelled => {
                return finish(RunStatus::Cancelled, iterations, tools_used, None);
            }
            CallResult::Failed(e) => {
                return finish(RunStatus::Error, iterations, tools_used, Some(e));
            }
        };
        iterations += 1;

        let assistant = Message {
            role: Role::Assistant,
            blocks: response.blocks.clone(),
        };
        let text = assistant.text();
        if !text.is_empty() {
            deps.emit(AgentEvent::AssistantText(text));
        }
        if let Err(e) = session.append_message(assistant) {
            return finish(RunStatus::Error, iterations, tools_used, Some(e.to_string()));
        }

        let tool_uses: Vec<(String, String, serde_json::Value)> = response
            .tool_uses()
            .into_iter()
            .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
            .collect();
        if tool_uses.is_empty() {
            return finish(RunStatus::Completed, iterations, tools_used, None);
        }

        // Sequential, source-ordered dispatch.  On cancellation the
        // remaining calls are answered with error results so the
        // use/result pairing stays intact.
        let mut result_blocks: Vec<ContentBlock> = Vec::with_capacity(tool_uses.len());
        let mut cancelled_mid_dispatch = false;
        for (id, name, input) in &tool_uses {
            if cancelled_mid_dispatch || cancel.is_cancelled() {
                cancelled_mid_dispatch = true;
                result_blocks.push(ContentBlock::tool_error(id, "cancelled before execution"));
                continue;
            }
            deps.emit(AgentEvent::ToolCallStarted {
                call_id: id.clone(),
                name: name.clone(),
            });
            tools_used.push(name.clone());
            let output = deps
                .executor
                .dispatch(
                    session.store(),
                    &session.tool_group(),
                    ToolInvocation {
                        id: id.clone(),
                        session_id: session.id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    },
                )
                .await;
            let is_error = output.is_error();
            deps.emit(AgentEvent::ToolCallFinished {
                call_id: id.clone(),
                name: name.clone(),
                is_error,
            });

            // Identical consecutive failures from the same tool raise a
            // repeated-error event; the loop itself keeps going so the
            // model can change course.
            if let Some(error_text) = &output.error {
                let threshold = loop_cfg.repeated_error_threshold;
                last_error = match last_error.take() {
                    Some((n, e, count)) if n == *name && e == *error_text => {
                        let count = count + 1;
                        if count == threshold {
                            deps.emit(AgentEvent::RepeatedToolError {
                                name: name.clone(),
                                error_class: e.clone(),
                                count,
                            });
                            warn!(tool = %name, count, "repeated identical tool error");
                        }
                        Some((n, e, count))
                    }
                    _ => Some((name.clone(), error_text.clone(), 1)),
                };
            } else {
                last_error = None;
            }

            result_blocks.push(output.into_result_block(id));
        }

        if let Err(e) = session.append_message(Message::tool_results(result_blocks)) {
            return finish(RunStatus::Error, iterations, tools_used, Some(e.to_string()));
        }
        if cancelled_mid_dispatch {
            return finish(RunStatus::Cancelled, iterations, tools_used, None);
        }
    }
}

/// The latest user-or-assistant text, used as the selector's task summary.
fn latest_task_text(messages: &[Message], fallback: &str) -> String {
    messages
        .iter()
        .rev()
        .filter(|m| !m.is_tool_result())
        .map(|m| m.text())
        .find(|t| !t.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

enum CallResult {
    Ok(maestro_model::ModelResponse),
    Cancelled,
    Failed(String),
}

/// Call the model, retrying retriable transport errors with exponential
/// backoff plus jitter, bounded by the configured total budget.
/// Cancellation is honoured between attempts; non-retriable errors fail
/// the run immediately.
async fn call_with_retry(
    deps: &RunnerDeps,
    req: ModelRequest,
    cancel: &CancelToken,
) -> CallResult {
    let budget = Duration::from_secs(deps.config.loop_.retry_budget_secs);
    let mut delay = Duration::from_millis(deps.config.loop_.retry_initial_ms.max(1));
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return CallResult::Cancelled;
        }
        match deps.provider.complete(req.clone()).await {
            Ok(response) => return CallResult::Ok(response),
            Err(e) if e.is_retriable() && started.elapsed() + delay < budget => {
                attempt += 1;
                let jitter =
                    Duration::from_millis(rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2));
                debug!(attempt, error = %e, delay_ms = (delay + jitter).as_millis() as u64,
                       "retrying model call");
                tokio::time::sleep(delay + jitter).await;
                delay *= 2;
            }
            Err(e) => {
                let kind = if e.is_retriable() {
                    "retry budget exhausted"
                } else {
                    "non-retriable"
                };
                warn!(class = e.class(), error = %e, "model call failed ({kind})");
                return CallResult::Failed(format!("{} ({})", e, e.class()));
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
