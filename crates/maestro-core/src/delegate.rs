// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use maestro_tools::{Tool, ToolInvocation, ToolOutput};

use crate::coordinator::{SubagentRunner, SubagentTask};

/// `delegate(role, task, context?)` — hand a focused task to a specialist
/// subagent and return only its summary.
///
/// The role definition is read from `<roles_dir>/<role>.md`; an unknown
/// role is an error result, not a fallback.  Each delegation runs one level
/// deeper; beyond `max_depth` the call is refused so delegation chains
/// stay bounded.
pub struct DelegateTool {
    roles_dir: PathBuf,
    runner: Arc<dyn SubagentRunner>,
    /// Depth of the agent THIS tool instance belongs to.
    depth: u32,
    max_depth: u32,
}

impl DelegateTool {
    pub fn new(
        roles_dir: impl Into<PathBuf>,
        runner: Arc<dyn SubagentRunner>,
        depth: u32,
        max_depth: u32,
    ) -> Self {
        Self {
            roles_dir: roles_dir.into(),
            runner,
            depth,
            max_depth,
        }
    }

    fn load_role(&self, role: &str) -> Option<String> {
        // Role names are bare identifiers; anything path-like is rejected.
        if role.is_empty() || !role.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return None;
        }
        std::fs::read_to_string(self.roles_dir.join(format!("{role}.md"))).ok()
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Delegate a focused task to a specialist subagent (e.g. developer, \
         reviewer, researcher). The specialist works in an isolated context \
         and returns a compact summary of what it did."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "role": { "type": "string", "description": "Specialist role name" },
                "task": { "type": "string", "description": "What the specialist should do" },
                "context": { "type": "string", "description": "Optional background for the specialist" }
            },
            "required": ["role", "task"]
        })
    }

    async fn execute(&self, inv: &ToolInvocation) -> ToolOutput {
        let role = match inv.input.get("role").and_then(|v| v.as_str()) {
            Some(r) => r,
            None => return ToolOutput::err("missing 'role'"),
        };
        let task = match inv.input.get("task").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t,
            _ => return ToolOutput::err("missing 'task'"),
        };
        let context = inv.input.get("context").and_then(|v| v.as_str());

        if self.depth >= self.max_depth {
            return ToolOutput::err(format!(
                "delegation depth limit ({}) reached; finish this task directly",
                self.max_depth
            ));
        }

        let role_definition = match self.load_role(role) {
            Some(d) => d,
            None => return ToolOutput::err(format!("unknown specialist role: {role}")),
        };

        let mut prompt = format!("{role_definition}\n\n## Task\n\n{task}");
        if let Some(snippet) = context {
            prompt.push_str(&format!("\n\n## Context\n\n{snippet}"));
        }

        let subtask = SubagentTask {
            task_id: Uuid::new_v4().to_string(),
            role: role.to_string(),
            prompt,
            context_snippet: context.map(String::from),
            depth: self.depth + 1,
        };
        debug!(role, depth = self.depth + 1, "delegating to specialist");

        match self.runner.run(subtask).await {
            Ok(result) if result.success => {
                let mut output = result.summary;
                if let Some(artifacts) = result.artifacts_ref {
                    output.push_str(&format!("\n\nArtifacts: {artifacts}"));
                }
                ToolOutput::ok(output)
            }
            Ok(result) => ToolOutput::err(format!("specialist '{role}' failed: {}", result.summary)),
            Err(e) => ToolOutput::err(format!("specialist '{role}' failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::SubagentResult;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records what it was asked to run and answers with a fixed summary.
    struct RecordingRunner {
        seen: Mutex<Vec<SubagentTask>>,
    }

    #[async_trait]
    impl SubagentRunner for RecordingRunner {
        async fn run(&self, task: SubagentTask) -> anyhow::Result<SubagentResult> {
            let task_id = task.task_id.clone();
            self.seen.lock().unwrap().push(task);
            Ok(SubagentResult {
                task_id,
                success: true,
                summary: "wrote factorial() with tests".into(),
                artifacts_ref: None,
            })
        }
    }

    fn setup(depth: u32) -> (TempDir, Arc<RecordingRunner>, DelegateTool) {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("developer.md"),
            "You are a developer. Write focused, tested code.",
        )
        .unwrap();
        let runner = Arc::new(RecordingRunner {
            seen: Mutex::new(Vec::new()),
        });
        let tool = DelegateTool::new(tmp.path(), runner.clone(), depth, 3);
        (tmp, runner, tool)
    }

    fn invocation(input: Value) -> ToolInvocation {
        ToolInvocation {
            id: "tc".into(),
            session_id: "s".into(),
            name: "delegate".into(),
            input,
        }
    }

    #[tokio::test]
    async fn returns_summary_only() {
        let (_tmp, runner, tool) = setup(0);
        let out = tool
            .execute(&invocation(json!({
                "role": "developer", "task": "write factorial"
            })))
            .await;
        assert!(!out.is_error());
        assert_eq!(out.output, "wrote factorial() with tests");
        // The subagent prompt carried the role definition and the task.
        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].prompt.contains("You are a developer"));
        assert!(seen[0].prompt.contains("write factorial"));
        assert_eq!(seen[0].depth, 1);
    }

    #[tokio::test]
    async fn unknown_role_is_an_error() {
        let (_tmp, _runner, tool) = setup(0);
        let out = tool
            .execute(&invocation(json!({
                "role": "astronaut", "task": "go to space"
            })))
            .await;
        assert!(out.is_error());
        assert!(out.error.unwrap().contains("unknown specialist role"));
    }

    #[tokio::test]
    async fn path_like_role_is_rejected() {
        let (_tmp, _runner, tool) = setup(0);
        let out = tool
            .execute(&invocation(json!({
                "role": "../secrets", "task": "x"
            })))
            .await;
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn depth_limit_refuses_delegation() {
        let (_tmp, runner, tool) = setup(3);
        let out = tool
            .execute(&invocation(json!({
                "role": "developer", "task": "one more level"
            })))
            .await;
        assert!(out.is_error());
        assert!(out.error.unwrap().contains("depth limit"));
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_snippet_is_forwarded() {
        let (_tmp, runner, tool) = setup(0);
        tool.execute(&invocation(json!({
            "role": "developer", "task": "refactor",
            "context": "the module lives in src/parser.rs"
        })))
        .await;
        let seen = runner.seen.lock().unwrap();
        assert!(seen[0].prompt.contains("src/parser.rs"));
        assert_eq!(
            seen[0].context_snippet.as_deref(),
            Some("the module lives in src/parser.rs")
        );
    }

    #[tokio::test]
    async fn failed_specialist_surfaces_as_error_result() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("developer.md"), "dev role").unwrap();
        struct FailingRunner;
        #[async_trait]
        impl SubagentRunner for FailingRunner {
            async fn run(&self, task: SubagentTask) -> anyhow::Result<SubagentResult> {
                Ok(SubagentResult::failure(&task.task_id, "could not build"))
            }
        }
        let tool = DelegateTool::new(tmp.path(), Arc::new(FailingRunner), 0, 3);
        let out = tool
            .execute(&invocation(json!({"role": "developer", "task": "x"})))
            .await;
        assert!(out.is_error());
        assert!(out.error.unwrap().contains("could not build"));
    }
}
