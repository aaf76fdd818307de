// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Lifecycle points at which hooks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    PreTool,
    PostTool,
    OnError,
    OnSessionStart,
    OnSessionEnd,
}

impl HookPhase {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre_tool" => Some(Self::PreTool),
            "post_tool" => Some(Self::PostTool),
            "on_error" => Some(Self::OnError),
            "on_session_start" => Some(Self::OnSessionStart),
            "on_session_end" => Some(Self::OnSessionEnd),
            _ => None,
        }
    }
}

/// The event payload handed to a hook.
#[derive(Debug, Clone, Serialize)]
pub struct HookEvent {
    pub phase: HookPhase,
    pub tool_name: String,
    pub arguments: Value,
    /// Post-tool only: the tool's text output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// On-error only: the failure text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a pre-tool hook decided.
#[derive(Debug, Clone)]
pub enum HookAction {
    Continue,
    /// Blocking pre-hook veto: the tool call is short-circuited with this
    /// reason as an error result.
    Block { reason: String },
    /// Replace the tool arguments before rule evaluation and execution.
    Rewrite { arguments: Value },
}

#[async_trait]
pub trait Hook: Send + Sync {
    fn phase(&self) -> HookPhase;
    /// Only blocking pre-tool hooks may veto; non-blocking hooks are
    /// observational regardless of what they return.
    fn blocking(&self) -> bool {
        false
    }
    async fn fire(&self, event: &HookEvent) -> HookAction;
}

/// Outcome of running the pre-tool chain.
#[derive(Debug, Clone)]
pub enum PreToolDecision {
    /// Proceed with these (possibly rewritten) arguments.
    Allow(Value),
    Veto(String),
}

/// Ordered hook chain.  Pre-tool hooks run in registration order; each may
/// veto (if blocking) or rewrite the arguments seen by later hooks, the
/// rule engine, and the tool itself.
#[derive(Default)]
pub struct HookEngine {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hook: impl Hook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    pub fn add_arc(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub async fn fire_pre_tool(&self, tool_name: &str, arguments: Value) -> PreToolDecision {
        let mut current = arguments;
        for hook in self.hooks.iter().filter(|h| h.phase() == HookPhase::PreTool) {
            let event = HookEvent {
                phase: HookPhase::PreTool,
                tool_name: tool_name.to_string(),
                arguments: current.clone(),
                result: None,
                error: None,
            };
            match hook.fire(&event).await {
                HookAction::Continue => {}
                HookAction::Block { reason } if hook.blocking() => {
                    return PreToolDecision::Veto(reason);
                }
                HookAction::Block { reason } => {
                    warn!(tool = tool_name, reason = %reason,
                          "non-blocking hook attempted a veto; ignored");
                }
                HookAction::Rewrite { arguments } => current = arguments,
            }
        }
        PreToolDecision::Allow(current)
    }

    /// Post-tool hooks are observational; their return value is ignored.
    pub async fn fire_post_tool(&self, tool_name: &str, arguments: &Value, result: &str) {
        let event = HookEvent {
            phase: HookPhase::PostTool,
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            result: Some(result.to_string()),
            error: None,
        };
        for hook in self.hooks.iter().filter(|h| h.phase() == HookPhase::PostTool) {
            let _ = hook.fire(&event).await;
        }
    }

    pub async fn fire_on_error(&self, tool_name: &str, arguments: &Value, error: &str) {
        let event = HookEvent {
            phase: HookPhase::OnError,
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            result: None,
            error: Some(error.to_string()),
        };
        for hook in self.hooks.iter().filter(|h| h.phase() == HookPhase::OnError) {
            let _ = hook.fire(&event).await;
        }
    }

    pub async fn fire_session(&self, phase: HookPhase, session_id: &str) {
        debug_assert!(matches!(
            phase,
            HookPhase::OnSessionStart | HookPhase::OnSessionEnd
        ));
        let event = HookEvent {
            phase,
            tool_name: String::new(),
            arguments: serde_json::json!({ "session_id": session_id }),
            result: None,
            error: None,
        };
        for hook in self.hooks.iter().filter(|h| h.phase() == phase) {
            let _ = hook.fire(&event).await;
        }
    }
}

/// A hook backed by a shell command.  The event JSON goes to stdin; for
/// blocking pre-tool hooks a non-zero exit vetoes the call, and a stdout
/// body that parses as JSON rewrites the arguments.
pub struct CommandHook {
    phase: HookPhase,
    command: String,
    blocking: bool,
}

impl CommandHook {
    pub fn new(phase: HookPhase, command: impl Into<String>, blocking: bool) -> Self {
        Self {
            phase,
            command: command.into(),
            blocking,
        }
    }
}

#[async_trait]
impl Hook for CommandHook {
    fn phase(&self) -> HookPhase {
        self.phase
    }

    fn blocking(&self) -> bool {
        self.blocking
    }

    async fn fire(&self, event: &HookEvent) -> HookAction {
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialize hook event");
                return HookAction::Continue;
            }
        };

        let spawned = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(c) => c,
            Err(e) => {
                warn!(command = %self.command, error = %e, "hook command failed to spawn");
                return HookAction::Continue;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(&payload).await;
        }

        let output = match child.wait_with_output().await {
            Ok(o) => o,
            Err(e) => {
                warn!(command = %self.command, error = %e, "hook command failed");
                return HookAction::Continue;
            }
        };

        debug!(command = %self.command, status = ?output.status.code(), "hook command ran");

        if self.blocking && self.phase == HookPhase::PreTool && !output.status.success() {
            let reason = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return HookAction::Block {
                reason: if reason.is_empty() {
                    format!("blocked by hook: {}", self.command)
                } else {
                    reason
                },
            };
        }

        if self.phase == HookPhase::PreTool {
            if let Ok(rewritten) = serde_json::from_slice::<Value>(&output.stdout) {
                if rewritten.is_object() && rewritten != event.arguments {
                    return HookAction::Rewrite {
                        arguments: rewritten,
                    };
                }
            }
        }

        HookAction::Continue
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
