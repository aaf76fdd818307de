// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use maestro_model::{ContentBlock, ImageSource, ToolResultPart};

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Opaque identifier from the model's tool_use block (forwarded verbatim).
    pub id: String,
    pub session_id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub input: Value,
}

/// The result of executing a tool.
///
/// `error` set means the tool failed non-fatally; the text is carried back
/// to the model inside the tool_result block so it can self-correct.
/// `system` is an out-of-band note for the core (never shown to the model).
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub output: String,
    pub error: Option<String>,
    pub images: Vec<ImageSource>,
    pub system: Option<String>,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_images(mut self, images: Vec<ImageSource>) -> Self {
        self.images = images;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into the tool_result content block paired with `tool_use_id`.
    pub fn into_result_block(self, tool_use_id: &str) -> ContentBlock {
        match self.error {
            Some(message) => ContentBlock::tool_error(tool_use_id, message),
            None => {
                let mut content = vec![ToolResultPart::Text { text: self.output }];
                for source in self.images {
                    content.push(ToolResultPart::Image { source });
                }
                ContentBlock::ToolResult {
                    tool_use_id: tool_use_id.to_string(),
                    content,
                    is_error: false,
                }
            }
        }
    }
}

/// Trait implemented by every tool the executor can dispatch.
///
/// Tools contain their failures: `execute` never panics outward and wraps
/// failures in [`ToolOutput::err`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the input object.
    fn input_schema(&self) -> Value;
    /// Per-tool timeout override; `None` uses the executor default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
    async fn execute(&self, inv: &ToolInvocation) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_output_converts_to_non_error_block() {
        let block = ToolOutput::ok("done").into_result_block("tc_1");
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "tc_1");
                assert!(!is_error);
                assert!(matches!(&content[0], ToolResultPart::Text { text } if text == "done"));
            }
            other => panic!("wrong block: {other:?}"),
        }
    }

    #[test]
    fn err_output_converts_to_error_block() {
        let block = ToolOutput::err("no such file").into_result_block("tc_2");
        match block {
            ContentBlock::ToolResult { is_error, .. } => assert!(is_error),
            other => panic!("wrong block: {other:?}"),
        }
    }

    #[test]
    fn images_append_after_text() {
        let out = ToolOutput::ok("screenshot taken")
            .with_images(vec![ImageSource::new("image/png", "AAAA")]);
        let block = out.into_result_block("tc_3");
        match block {
            ContentBlock::ToolResult { content, .. } => {
                assert_eq!(content.len(), 2);
                assert!(matches!(content[1], ToolResultPart::Image { .. }));
            }
            other => panic!("wrong block: {other:?}"),
        }
    }
}
