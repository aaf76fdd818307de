// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ─── Content blocks ───────────────────────────────────────────────────────────

/// A base64-encoded image with its MIME type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSource {
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

impl ImageSource {
    pub fn new(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Stable short identifier derived from the image content.
    ///
    /// Used as the thumbnail reference when context compaction replaces the
    /// image with a textual placeholder.  Content-derived so that compaction
    /// is deterministic for identical inputs.
    pub fn thumb_id(&self) -> String {
        let digest = Sha256::digest(self.data.as_bytes());
        hex::encode(&digest[..4])
    }
}

/// One part of a tool result: tools may return text plus screenshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultPart {
    Text { text: String },
    Image { source: ImageSource },
}

/// A single content block inside a message.
///
/// The block set mirrors the chat-completion wire format: plain text,
/// images, tool-use requests emitted by the assistant, and tool results
/// carried back in the following user-role message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ToolResultPart>,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource::new(media_type, data),
        }
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Plain-text tool result.
    pub fn tool_result(tool_use_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: vec![ToolResultPart::Text {
                text: output.into(),
            }],
            is_error: false,
        }
    }

    /// Tool result carrying an error message.
    pub fn tool_error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: vec![ToolResultPart::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

// ─── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message in the conversation: a role plus an ordered block list.
/// Immutable once appended to a transcript.
///
/// Tool results travel as user-role messages whose blocks are all
/// `ToolResult` — the wire format the provider expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            blocks: vec![ContentBlock::text(text)],
        }
    }

    /// Assemble the user-role message that carries one turn's tool results.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        debug_assert!(blocks
            .iter()
            .all(|b| matches!(b, ContentBlock::ToolResult { .. })));
        Self {
            role: Role::User,
            blocks,
        }
    }

    /// The concatenated text of all `Text` blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All `ToolUse` blocks in source order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }

    /// True when this message is a tool-result carrier.
    pub fn is_tool_result(&self) -> bool {
        !self.blocks.is_empty()
            && self
                .blocks
                .iter()
                .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
    }

    /// Number of image blocks, including images nested in tool results.
    pub fn image_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Image { .. } => 1,
                ContentBlock::ToolResult { content, .. } => content
                    .iter()
                    .filter(|p| matches!(p, ToolResultPart::Image { .. }))
                    .count(),
                _ => 0,
            })
            .sum()
    }

    /// Approximate token count used for context accounting.
    ///
    /// 4 chars per token for text; a flat 765-token estimate per image
    /// (the typical cost of a 512×512 region).
    pub fn approx_tokens(&self) -> usize {
        const IMAGE_TOKENS: usize = 765;
        let chars: usize = self
            .blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => text.len(),
                ContentBlock::Image { .. } => IMAGE_TOKENS * 4,
                ContentBlock::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
                ContentBlock::ToolResult { content, .. } => content
                    .iter()
                    .map(|p| match p {
                        ToolResultPart::Text { text } => text.len(),
                        ToolResultPart::Image { .. } => IMAGE_TOKENS * 4,
                    })
                    .sum(),
            })
            .sum();
        (chars / 4).max(1)
    }
}

// ─── Requests and responses ───────────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the input object.
    pub input_schema: serde_json::Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// Concrete model name (already resolved from a tier).
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
    /// Extended-reasoning token allotment; 0 disables thinking.
    pub thinking_tokens: u32,
}

/// Why the model stopped emitting blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// Token usage from one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The provider's answer: an ordered block list plus bookkeeping.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub blocks: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl ModelResponse {
    /// Convenience used by mocks and tests: a plain text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_uses(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.text(), "hello");
    }

    #[test]
    fn tool_uses_preserve_source_order() {
        let m = Message {
            role: Role::Assistant,
            blocks: vec![
                ContentBlock::tool_use("a", "first", json!({})),
                ContentBlock::text("interleaved"),
                ContentBlock::tool_use("b", "second", json!({})),
            ],
        };
        let uses = m.tool_uses();
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0].0, "a");
        assert_eq!(uses[1].0, "b");
    }

    #[test]
    fn tool_result_carrier_is_detected() {
        let m = Message::tool_results(vec![ContentBlock::tool_result("a", "ok")]);
        assert!(m.is_tool_result());
        assert!(!Message::user("hi").is_tool_result());
    }

    #[test]
    fn image_count_includes_tool_result_images() {
        let m = Message {
            role: Role::User,
            blocks: vec![
                ContentBlock::image("image/png", "AAAA"),
                ContentBlock::ToolResult {
                    tool_use_id: "t".into(),
                    content: vec![
                        ToolResultPart::Text { text: "shot".into() },
                        ToolResultPart::Image {
                            source: ImageSource::new("image/png", "BBBB"),
                        },
                    ],
                    is_error: false,
                },
            ],
        };
        assert_eq!(m.image_count(), 2);
    }

    #[test]
    fn approx_tokens_counts_images_flat() {
        let text = Message::user("12345678");
        assert_eq!(text.approx_tokens(), 2);
        let img = Message {
            role: Role::User,
            blocks: vec![ContentBlock::image("image/png", "AAAA")],
        };
        assert_eq!(img.approx_tokens(), 765);
    }

    #[test]
    fn thumb_id_is_deterministic() {
        let a = ImageSource::new("image/png", "SAMEDATA");
        let b = ImageSource::new("image/png", "SAMEDATA");
        assert_eq!(a.thumb_id(), b.thumb_id());
        assert_eq!(a.thumb_id().len(), 8);
        let c = ImageSource::new("image/png", "OTHERDATA");
        assert_ne!(a.thumb_id(), c.thumb_id());
    }

    #[test]
    fn message_serde_round_trip() {
        let original = Message {
            role: Role::Assistant,
            blocks: vec![
                ContentBlock::text("running a command"),
                ContentBlock::tool_use("tc_1", "bash", json!({"command": "ls"})),
            ],
        };
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn tool_result_serde_defaults_is_error_false() {
        let json = r#"{"type":"tool_result","tool_use_id":"x","content":[{"type":"text","text":"ok"}]}"#;
        let block: ContentBlock = serde_json::from_str(json).unwrap();
        match block {
            ContentBlock::ToolResult { is_error, .. } => assert!(!is_error),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn response_tool_use_detection() {
        let r = ModelResponse {
            blocks: vec![ContentBlock::tool_use("a", "edit", json!({}))],
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        };
        assert!(r.has_tool_uses());
        assert!(!ModelResponse::text("done").has_tool_uses());
    }
}
