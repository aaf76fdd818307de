// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolInvocation, ToolOutput};

/// Shell command execution with combined stdout/stderr capture.
/// The executor's per-tool timeout bounds runaway commands.
pub struct BashTool {
    workdir: PathBuf,
    timeout: Duration,
}

impl BashTool {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output. \
         Long-running commands are killed at the timeout."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to run" }
            },
            "required": ["command"]
        })
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn execute(&self, inv: &ToolInvocation) -> ToolOutput {
        let command = match inv.input.get("command").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c,
            _ => return ToolOutput::err("missing 'command'"),
        };

        let result = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .kill_on_drop(true)
            .output()
            .await;

        match result {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
                if output.status.success() {
                    ToolOutput::ok(text)
                } else {
                    ToolOutput::err(format!(
                        "command exited with {}:\n{text}",
                        output.status.code().unwrap_or(-1)
                    ))
                }
            }
            Err(e) => ToolOutput::err(format!("failed to spawn command: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn invocation(command: &str) -> ToolInvocation {
        ToolInvocation {
            id: "tc".into(),
            session_id: "s".into(),
            name: "bash".into(),
            input: json!({ "command": command }),
        }
    }

    #[tokio::test]
    async fn captures_stdout() {
        let tmp = TempDir::new().unwrap();
        let tool = BashTool::new(tmp.path(), Duration::from_secs(5));
        let out = tool.execute(&invocation("echo hello")).await;
        assert!(!out.is_error());
        assert_eq!(out.output.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_with_output() {
        let tmp = TempDir::new().unwrap();
        let tool = BashTool::new(tmp.path(), Duration::from_secs(5));
        let out = tool.execute(&invocation("echo oops >&2; exit 3")).await;
        assert!(out.is_error());
        let err = out.error.unwrap();
        assert!(err.contains("exited with 3"));
        assert!(err.contains("oops"));
    }

    #[tokio::test]
    async fn runs_in_workdir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "x").unwrap();
        let tool = BashTool::new(tmp.path(), Duration::from_secs(5));
        let out = tool.execute(&invocation("ls")).await;
        assert!(out.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn missing_command_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let tool = BashTool::new(tmp.path(), Duration::from_secs(5));
        let out = tool
            .execute(&ToolInvocation {
                id: "tc".into(),
                session_id: "s".into(),
                name: "bash".into(),
                input: json!({}),
            })
            .await;
        assert!(out.is_error());
    }
}
