// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use maestro_store::{NewTask, TaskPriority, TaskStore};

use crate::{Tool, ToolInvocation, ToolOutput};

/// Chat-side to-do tool.  Creates only root tasks — nesting happens through
/// folder moves, never from chat.
pub struct TodoTool {
    tasks: Arc<TaskStore>,
    project: String,
}

impl TodoTool {
    pub fn new(tasks: Arc<TaskStore>, project: impl Into<String>) -> Self {
        Self {
            tasks,
            project: project.into(),
        }
    }
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        "todo"
    }

    fn description(&self) -> &str {
        "Create a to-do item for the current project. Items land at the top \
         level of the task tree."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "priority": { "type": "string", "enum": ["low", "medium", "high", "critical"] },
                "notes": { "type": "string" }
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, inv: &ToolInvocation) -> ToolOutput {
        let title = match inv.input.get("title").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => return ToolOutput::err("missing 'title'"),
        };
        let priority = match inv.input.get("priority").and_then(|v| v.as_str()) {
            None => None,
            Some("low") => Some(TaskPriority::Low),
            Some("medium") => Some(TaskPriority::Medium),
            Some("high") => Some(TaskPriority::High),
            Some("critical") => Some(TaskPriority::Critical),
            Some(other) => return ToolOutput::err(format!("unknown priority: {other}")),
        };
        let notes = inv
            .input
            .get("notes")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let new = NewTask {
            title,
            priority,
            notes,
            ..NewTask::default()
        };
        match self.tasks.create(&self.project, new) {
            Ok(task) => ToolOutput::ok(format!("created task {} ({})", task.title, task.id)),
            Err(e) => ToolOutput::err(format!("creating task: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_root_task() {
        let tmp = TempDir::new().unwrap();
        let tasks = Arc::new(TaskStore::new(tmp.path()).unwrap());
        let tool = TodoTool::new(tasks.clone(), "demo");
        let out = tool
            .execute(&ToolInvocation {
                id: "tc".into(),
                session_id: "s".into(),
                name: "todo".into(),
                input: json!({ "title": "Review PR", "priority": "high" }),
            })
            .await;
        assert!(!out.is_error());
        let all = tasks.list("demo").unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].parent_id.is_none());
        assert_eq!(all[0].priority, TaskPriority::High);
    }

    #[tokio::test]
    async fn rejects_unknown_priority() {
        let tmp = TempDir::new().unwrap();
        let tasks = Arc::new(TaskStore::new(tmp.path()).unwrap());
        let tool = TodoTool::new(tasks, "demo");
        let out = tool
            .execute(&ToolInvocation {
                id: "tc".into(),
                session_id: "s".into(),
                name: "todo".into(),
                input: json!({ "title": "x", "priority": "urgent" }),
            })
            .await;
        assert!(out.is_error());
    }
}
