// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolInvocation, ToolOutput};

/// File editing: create, replace a unique string, insert at a line.
/// Paths resolve inside the workspace root; escapes are rejected.
pub struct EditTool {
    workspace: PathBuf,
}

impl EditTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let joined = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.workspace.join(path)
        };
        // Normalise `..` components without requiring the file to exist.
        let mut normal = PathBuf::new();
        for comp in joined.components() {
            match comp {
                std::path::Component::ParentDir => {
                    if !normal.pop() {
                        return Err(format!("path escapes workspace: {path}"));
                    }
                }
                std::path::Component::CurDir => {}
                other => normal.push(other),
            }
        }
        if !normal.starts_with(&self.workspace) {
            return Err(format!("path escapes workspace: {path}"));
        }
        Ok(normal)
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Create or modify files. Commands: 'create' writes file_text to path; \
         'str_replace' replaces a unique old_str with new_str; 'insert' adds \
         new_str after line insert_line."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "enum": ["create", "str_replace", "insert"] },
                "path": { "type": "string" },
                "file_text": { "type": "string" },
                "old_str": { "type": "string" },
                "new_str": { "type": "string" },
                "insert_line": { "type": "integer" }
            },
            "required": ["command", "path"]
        })
    }

    async fn execute(&self, inv: &ToolInvocation) -> ToolOutput {
        let command = match inv.input.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolOutput::err("missing 'command'"),
        };
        let path_arg = match inv.input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err("missing 'path'"),
        };
        let path = match self.resolve(path_arg) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(e),
        };

        match command {
            "create" => {
                let text = inv
                    .input
                    .get("file_text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if let Some(parent) = path.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        return ToolOutput::err(format!("creating parent dirs: {e}"));
                    }
                }
                match tokio::fs::write(&path, text).await {
                    Ok(()) => ToolOutput::ok(format!("created {}", path.display())),
                    Err(e) => ToolOutput::err(format!("writing {}: {e}", path.display())),
                }
            }
            "str_replace" => {
                let old_str = match inv.input.get("old_str").and_then(|v| v.as_str()) {
                    Some(s) if !s.is_empty() => s,
                    _ => return ToolOutput::err("missing 'old_str'"),
                };
                let new_str = inv
                    .input
                    .get("new_str")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let content = match tokio::fs::read_to_string(&path).await {
                    Ok(c) => c,
                    Err(e) => return ToolOutput::err(format!("reading {}: {e}", path.display())),
                };
                let occurrences = content.matches(old_str).count();
                if occurrences == 0 {
                    return ToolOutput::err("old_str not found in file");
                }
                if occurrences > 1 {
                    return ToolOutput::err(format!(
                        "old_str occurs {occurrences} times; must be unique"
                    ));
                }
                let updated = content.replacen(old_str, new_str, 1);
                match tokio::fs::write(&path, updated).await {
                    Ok(()) => ToolOutput::ok(format!("replaced in {}", path.display())),
                    Err(e) => ToolOutput::err(format!("writing {}: {e}", path.display())),
                }
            }
            "insert" => {
                let line = inv
                    .input
                    .get("insert_line")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize;
                let new_str = inv
                    .input
                    .get("new_str")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let content = match tokio::fs::read_to_string(&path).await {
                    Ok(c) => c,
                    Err(e) => return ToolOutput::err(format!("reading {}: {e}", path.display())),
                };
                let mut lines: Vec<&str> = content.lines().collect();
                if line > lines.len() {
                    return ToolOutput::err(format!(
                        "insert_line {line} beyond end of file ({} lines)",
                        lines.len()
                    ));
                }
                lines.insert(line, new_str);
                let updated = lines.join("\n") + "\n";
                match tokio::fs::write(&path, updated).await {
                    Ok(()) => ToolOutput::ok(format!("inserted at line {line}")),
                    Err(e) => ToolOutput::err(format!("writing {}: {e}", path.display())),
                }
            }
            other => ToolOutput::err(format!("unknown command: {other}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn invocation(input: Value) -> ToolInvocation {
        ToolInvocation {
            id: "tc".into(),
            session_id: "s".into(),
            name: "edit".into(),
            input,
        }
    }

    #[tokio::test]
    async fn create_writes_file() {
        let tmp = TempDir::new().unwrap();
        let tool = EditTool::new(tmp.path());
        let out = tool
            .execute(&invocation(json!({
                "command": "create", "path": "hello.txt", "file_text": "hi"
            })))
            .await;
        assert!(!out.is_error(), "{:?}", out.error);
        assert_eq!(std::fs::read_to_string(tmp.path().join("hello.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn str_replace_requires_unique_match() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "aaa bbb aaa").unwrap();
        let tool = EditTool::new(tmp.path());
        let out = tool
            .execute(&invocation(json!({
                "command": "str_replace", "path": "f.txt",
                "old_str": "aaa", "new_str": "ccc"
            })))
            .await;
        assert!(out.is_error());
        assert!(out.error.unwrap().contains("must be unique"));
    }

    #[tokio::test]
    async fn str_replace_replaces_once() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "let x = 1;").unwrap();
        let tool = EditTool::new(tmp.path());
        let out = tool
            .execute(&invocation(json!({
                "command": "str_replace", "path": "f.txt",
                "old_str": "x = 1", "new_str": "x = 2"
            })))
            .await;
        assert!(!out.is_error());
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(),
            "let x = 2;"
        );
    }

    #[tokio::test]
    async fn path_escape_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let tool = EditTool::new(tmp.path());
        let out = tool
            .execute(&invocation(json!({
                "command": "create", "path": "../../outside.txt", "file_text": "x"
            })))
            .await;
        assert!(out.is_error());
        assert!(out.error.unwrap().contains("escapes workspace"));
    }

    #[tokio::test]
    async fn insert_at_line() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "one\ntwo\n").unwrap();
        let tool = EditTool::new(tmp.path());
        let out = tool
            .execute(&invocation(json!({
                "command": "insert", "path": "f.txt",
                "insert_line": 1, "new_str": "between"
            })))
            .await;
        assert!(!out.is_error());
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.txt")).unwrap(),
            "one\nbetween\ntwo\n"
        );
    }
}
