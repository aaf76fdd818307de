// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use maestro_store::{SessionDir, ToolCallRecord, ToolOutcome};

use crate::{
    hooks::PreToolDecision, HookEngine, RuleSet, ToolInvocation, ToolOutput, ToolRegistry,
};

/// Callback fired after every dispatch so the UI layer can broadcast.
pub type ExecutorNotifier = Arc<dyn Fn(&ToolCallRecord) + Send + Sync>;

/// Turns a tool_use block into a tool_result block: lookup, hooks, rules,
/// timed execution, logging, notification.
///
/// Failures never escape — every path produces a `ToolOutput`, and exactly
/// one `tool_log.jsonl` line is written per dispatch, before control returns
/// to the sampling loop.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    hooks: Arc<HookEngine>,
    rules: Arc<RuleSet>,
    default_timeout: Duration,
    notifier: Option<ExecutorNotifier>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        hooks: Arc<HookEngine>,
        rules: Arc<RuleSet>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            hooks,
            rules,
            default_timeout,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: ExecutorNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn hooks(&self) -> &Arc<HookEngine> {
        &self.hooks
    }

    /// Tool schemas for the active group, for the model request payload.
    pub fn schemas(&self, group: &str) -> Vec<maestro_model::ToolSchema> {
        self.registry.schemas(group)
    }

    /// Dispatch one tool call within the session's active tool group.
    pub async fn dispatch(
        &self,
        session: &SessionDir,
        group: &str,
        invocation: ToolInvocation,
    ) -> ToolOutput {
        let started_at = Utc::now();
        let name = invocation.name.clone();
        let call_id = invocation.id.clone();

        let (output, input_used, error_class) =
            self.run_guarded(session, group, invocation).await;

        let record = ToolCallRecord {
            id: call_id,
            session_id: session.id.clone(),
            name,
            input: input_used,
            started_at,
            ended_at: Utc::now(),
            outcome: if output.is_error() {
                ToolOutcome::Error
            } else {
                ToolOutcome::Ok
            },
            error_class,
        };
        if let Err(e) = session.append_tool_record(&record) {
            warn!(session = %session.id, error = %e, "failed to append tool log line");
        }
        debug!(
            tool = %record.name,
            call_id = %record.id,
            outcome = ?record.outcome,
            "tool dispatch finished"
        );
        if let Some(notifier) = &self.notifier {
            notifier(&record);
        }
        output
    }

    /// The dispatch pipeline up to (but not including) logging.
    /// Returns the output, the arguments that were actually used (post
    /// hook-rewrite, for the log), and an error class label.
    async fn run_guarded(
        &self,
        _session: &SessionDir,
        group: &str,
        invocation: ToolInvocation,
    ) -> (ToolOutput, Value, Option<String>) {
        let original_input = invocation.input.clone();

        // 1. Lookup within the active group.
        let tool = match self.registry.get(group, &invocation.name) {
            Some(t) => t,
            None => {
                return (
                    ToolOutput::err(format!("unknown tool: {}", invocation.name)),
                    original_input,
                    Some("unknown_tool".into()),
                );
            }
        };

        // 2. Pre-tool hooks: veto or rewrite.
        let input = match self
            .hooks
            .fire_pre_tool(&invocation.name, original_input.clone())
            .await
        {
            PreToolDecision::Allow(args) => args,
            PreToolDecision::Veto(reason) => {
                self.hooks
                    .fire_on_error(&invocation.name, &original_input, &reason)
                    .await;
                return (
                    ToolOutput::err(format!("blocked by hook: {reason}")),
                    original_input,
                    Some("hook_veto".into()),
                );
            }
        };

        // 3. Rules, evaluated against the post-rewrite arguments.
        if let Some(m) = self.rules.blocking_match(&input) {
            let message = format!("blocked by rule {}: {}", m.rule_id, m.message);
            self.hooks
                .fire_on_error(&invocation.name, &input, &message)
                .await;
            return (ToolOutput::err(message), input, Some("rule_violation".into()));
        }
        for m in self.rules.evaluate(&input) {
            if m.severity == crate::Severity::Warn {
                warn!(tool = %invocation.name, rule = %m.rule_id, "rule warning: {}", m.message);
            }
        }

        // 4. Timed execution.
        let timeout = tool.timeout().unwrap_or(self.default_timeout);
        let timed_invocation = ToolInvocation {
            input: input.clone(),
            ..invocation.clone()
        };
        let output = match tokio::time::timeout(timeout, tool.execute(&timed_invocation)).await {
            Ok(out) => out,
            Err(_) => ToolOutput::err(format!(
                "tool timed out after {}s",
                timeout.as_secs()
            )),
        };

        // 5/6. Post or error hooks.
        match &output.error {
            None => {
                self.hooks
                    .fire_post_tool(&invocation.name, &input, &output.output)
                    .await;
            }
            Some(error) => {
                self.hooks
                    .fire_on_error(&invocation.name, &input, error)
                    .await;
            }
        }

        let error_class = output.error.as_ref().map(|e| classify_tool_error(e));
        (output, input, error_class)
    }
}

/// Coarse error-class label for the tool log and knowledge capture.
fn classify_tool_error(error: &str) -> String {
    let lower = error.to_lowercase();
    if lower.contains("timed out") {
        "timeout".into()
    } else if lower.contains("no such file") || lower.contains("not found") {
        "not_found".into()
    } else if lower.contains("permission") {
        "permission".into()
    } else {
        "tool_error".into()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Hook, HookAction, HookEvent, HookPhase, Rule, RuleScope, Severity, Tool};
    use async_trait::async_trait;
    use maestro_store::SessionStore;
    use serde_json::json;
    use tempfile::TempDir;

    struct OkTool;

    #[async_trait]
    impl Tool for OkTool {
        fn name(&self) -> &str {
            "ok_tool"
        }
        fn description(&self) -> &str {
            "always succeeds"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, inv: &ToolInvocation) -> ToolOutput {
            ToolOutput::ok(format!("ran with {}", inv.input))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow_tool"
        }
        fn description(&self) -> &str {
            "sleeps forever"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }
        async fn execute(&self, _inv: &ToolInvocation) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolOutput::ok("never reached")
        }
    }

    struct RewriteHook;

    #[async_trait]
    impl Hook for RewriteHook {
        fn phase(&self) -> HookPhase {
            HookPhase::PreTool
        }
        async fn fire(&self, _event: &HookEvent) -> HookAction {
            HookAction::Rewrite {
                arguments: json!({ "command": "safe-command" }),
            }
        }
    }

    fn executor(rules: RuleSet) -> (TempDir, ToolExecutor, maestro_store::SessionDir) {
        let tmp = TempDir::new().unwrap();
        let sessions = SessionStore::new(tmp.path()).unwrap();
        let session = sessions.create("s1").unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(OkTool);
        registry.register(SlowTool);
        let exec = ToolExecutor::new(
            Arc::new(registry),
            Arc::new(HookEngine::new()),
            Arc::new(rules),
            Duration::from_secs(5),
        );
        (tmp, exec, session)
    }

    fn invocation(name: &str, input: Value) -> ToolInvocation {
        ToolInvocation {
            id: "tc_1".into(),
            session_id: "s1".into(),
            name: name.into(),
            input,
        }
    }

    #[tokio::test]
    async fn dispatch_success_logs_one_ok_line() {
        let (_tmp, exec, session) = executor(RuleSet::new(vec![]));
        let out = exec
            .dispatch(&session, "default", invocation("ok_tool", json!({"x": 1})))
            .await;
        assert!(!out.is_error());
        let log = session.load_tool_records().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, ToolOutcome::Ok);
        assert!(log[0].ended_at >= log[0].started_at);
    }

    #[tokio::test]
    async fn unknown_tool_yields_structured_error_and_log() {
        let (_tmp, exec, session) = executor(RuleSet::new(vec![]));
        let out = exec
            .dispatch(&session, "default", invocation("nope", json!({})))
            .await;
        assert!(out.is_error());
        assert!(out.error.unwrap().contains("unknown tool"));
        let log = session.load_tool_records().unwrap();
        assert_eq!(log[0].error_class.as_deref(), Some("unknown_tool"));
    }

    #[tokio::test]
    async fn error_rule_blocks_call() {
        let rules = RuleSet::new(vec![Rule {
            id: "no-x".into(),
            severity: Severity::Error,
            scope: RuleScope::Command,
            pattern: "forbidden*".into(),
            message: "forbidden command".into(),
        }]);
        let (_tmp, exec, session) = executor(rules);
        let out = exec
            .dispatch(
                &session,
                "default",
                invocation("ok_tool", json!({"command": "forbidden thing"})),
            )
            .await;
        assert!(out.is_error());
        assert!(out.error.unwrap().contains("blocked by rule"));
        let log = session.load_tool_records().unwrap();
        assert_eq!(log[0].error_class.as_deref(), Some("rule_violation"));
    }

    #[tokio::test]
    async fn rules_see_hook_rewritten_arguments() {
        // The rule blocks the ORIGINAL argument, but a pre-hook rewrites it
        // to a safe value first — so the call must pass.
        let rules = RuleSet::from_deny_patterns(&["dangerous*".to_string()]);
        let tmp = TempDir::new().unwrap();
        let sessions = SessionStore::new(tmp.path()).unwrap();
        let session = sessions.create("s1").unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(OkTool);
        let mut hooks = HookEngine::new();
        hooks.add(RewriteHook);
        let exec = ToolExecutor::new(
            Arc::new(registry),
            Arc::new(hooks),
            Arc::new(rules),
            Duration::from_secs(5),
        );
        let out = exec
            .dispatch(
                &session,
                "default",
                invocation("ok_tool", json!({"command": "dangerous thing"})),
            )
            .await;
        assert!(!out.is_error());
        // The log records the arguments that actually ran.
        let log = session.load_tool_records().unwrap();
        assert_eq!(log[0].input["command"], "safe-command");
    }

    #[tokio::test]
    async fn timeout_produces_error_result() {
        let (_tmp, exec, session) = executor(RuleSet::new(vec![]));
        let out = exec
            .dispatch(&session, "default", invocation("slow_tool", json!({})))
            .await;
        assert!(out.is_error());
        assert!(out.error.unwrap().contains("timed out"));
        let log = session.load_tool_records().unwrap();
        assert_eq!(log[0].error_class.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn notifier_fires_per_dispatch() {
        let (_tmp, exec, session) = executor(RuleSet::new(vec![]));
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = count.clone();
        let exec = exec.with_notifier(Arc::new(move |_rec| {
            c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        exec.dispatch(&session, "default", invocation("ok_tool", json!({})))
            .await;
        exec.dispatch(&session, "default", invocation("nope", json!({})))
            .await;
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
