// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    ContentBlock, Message, ModelError, ModelProvider, ModelRequest, ModelResponse, Role,
    StopReason, ToolResultPart, Usage,
};

/// Chat-completion client speaking the Anthropic messages wire format.
///
/// Auth is an opaque key; no other provider-specific state leaks into the
/// core.  Errors come back classified as [`ModelError`] so the sampling loop
/// can retry transport failures and terminate on protocol ones.
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            http: reqwest::Client::new(),
        }
    }

    fn build_body(req: &ModelRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(wire_message).collect();
        let mut body = json!({
            "model": req.model,
            "max_tokens": req.max_tokens,
            "system": req.system,
            "messages": messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.input_schema,
                        })
                    })
                    .collect(),
            );
        }
        // The API requires budget_tokens < max_tokens and at least the
        // provider minimum; a budget the request cannot honour is clamped,
        // and one too small to clamp drops thinking rather than 400ing.
        if req.thinking_tokens > 0 {
            let budget = req.thinking_tokens.min(req.max_tokens.saturating_sub(1));
            if budget >= MIN_THINKING_TOKENS {
                body["thinking"] = json!({
                    "type": "enabled",
                    "budget_tokens": budget,
                });
            }
        }
        body
    }
}

/// Smallest thinking budget the API accepts.
const MIN_THINKING_TOKENS: u32 = 1_024;

#[async_trait]
impl ModelProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, req: ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = Self::build_body(&req);
        debug!(model = %req.model, messages = req.messages.len(), "sending completion request");

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), retry_after, text));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        parse_response(&value)
    }
}

/// Map an HTTP error status onto the retry taxonomy.
fn classify_status(status: u16, retry_after_secs: Option<u64>, body: String) -> ModelError {
    match status {
        401 | 403 => ModelError::Auth(body),
        400 | 404 | 422 => ModelError::BadRequest(body),
        429 => ModelError::RateLimited { retry_after_secs },
        503 | 529 => ModelError::Overloaded,
        _ => ModelError::Network(format!("http {status}: {body}")),
    }
}

fn wire_message(msg: &Message) -> Value {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content: Vec<Value> = msg.blocks.iter().map(wire_block).collect();
    json!({ "role": role, "content": content })
}

fn wire_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Image { source } => json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": source.media_type,
                "data": source.data,
            },
        }),
        ContentBlock::ToolUse { id, name, input } => json!({
            "type": "tool_use", "id": id, "name": name, "input": input,
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let parts: Vec<Value> = content
                .iter()
                .map(|p| match p {
                    ToolResultPart::Text { text } => json!({ "type": "text", "text": text }),
                    ToolResultPart::Image { source } => json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": source.media_type,
                            "data": source.data,
                        },
                    }),
                })
                .collect();
            json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": parts,
                "is_error": is_error,
            })
        }
    }
}

fn parse_response(value: &Value) -> Result<ModelResponse, ModelError> {
    let content = value["content"]
        .as_array()
        .ok_or_else(|| ModelError::InvalidResponse("missing content array".into()))?;

    let mut blocks = Vec::with_capacity(content.len());
    for item in content {
        match item["type"].as_str() {
            // Thinking blocks are provider-internal; the loop only consumes
            // text and tool_use.
            Some("thinking") => continue,
            Some("text") => {
                let text = item["text"].as_str().unwrap_or_default().to_string();
                blocks.push(ContentBlock::Text { text });
            }
            Some("tool_use") => {
                let id = item["id"]
                    .as_str()
                    .ok_or_else(|| ModelError::InvalidResponse("tool_use without id".into()))?;
                let name = item["name"]
                    .as_str()
                    .ok_or_else(|| ModelError::InvalidResponse("tool_use without name".into()))?;
                // Providers must send an object; treat null as empty input.
                let input = match &item["input"] {
                    Value::Null => json!({}),
                    v => v.clone(),
                };
                blocks.push(ContentBlock::tool_use(id, name, input));
            }
            other => {
                return Err(ModelError::InvalidResponse(format!(
                    "unknown content block type: {other:?}"
                )))
            }
        }
    }

    let stop_reason = match value["stop_reason"].as_str() {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };
    let usage = Usage {
        input_tokens: value["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: value["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
    };

    Ok(ModelResponse {
        blocks,
        stop_reason,
        usage,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_auth_and_bad_request_are_terminal() {
        assert!(!classify_status(401, None, "k".into()).is_retriable());
        assert!(!classify_status(400, None, "b".into()).is_retriable());
    }

    #[test]
    fn classify_429_and_529_are_retriable() {
        assert!(classify_status(429, Some(5), String::new()).is_retriable());
        assert!(classify_status(529, None, String::new()).is_retriable());
    }

    #[test]
    fn wire_message_maps_tool_result_blocks() {
        let msg = Message::tool_results(vec![ContentBlock::tool_result("tc_1", "done")]);
        let wire = wire_message(&msg);
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "tc_1");
    }

    #[test]
    fn build_body_omits_empty_tools_and_thinking() {
        let req = ModelRequest {
            model: "m".into(),
            system: "s".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
            ..Default::default()
        };
        let body = AnthropicClient::build_body(&req);
        assert!(body.get("tools").is_none());
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn build_body_includes_thinking_budget() {
        let req = ModelRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 8_192,
            thinking_tokens: 2_048,
            ..Default::default()
        };
        let body = AnthropicClient::build_body(&req);
        assert_eq!(body["thinking"]["budget_tokens"], 2_048);
    }

    #[test]
    fn thinking_budget_stays_strictly_below_max_tokens() {
        // A budget at or above max_tokens is clamped below it.
        for thinking_tokens in [8_192, 24_576] {
            let req = ModelRequest {
                model: "m".into(),
                messages: vec![Message::user("hi")],
                max_tokens: 8_192,
                thinking_tokens,
                ..Default::default()
            };
            let body = AnthropicClient::build_body(&req);
            let budget = body["thinking"]["budget_tokens"].as_u64().unwrap();
            assert!(
                budget < body["max_tokens"].as_u64().unwrap(),
                "budget {budget} must be below max_tokens"
            );
        }
    }

    #[test]
    fn unclampable_thinking_budget_is_dropped() {
        // Clamping would land below the provider minimum; the request goes
        // out without thinking instead of with an invalid budget.
        let req = ModelRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 512,
            thinking_tokens: 2_048,
            ..Default::default()
        };
        let body = AnthropicClient::build_body(&req);
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn parse_response_extracts_blocks_in_order() {
        let value = serde_json::json!({
            "content": [
                { "type": "text", "text": "let me check" },
                { "type": "tool_use", "id": "tc_1", "name": "bash",
                  "input": { "command": "ls" } },
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 12, "output_tokens": 34 },
        });
        let resp = parse_response(&value).unwrap();
        assert_eq!(resp.blocks.len(), 2);
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.usage.output_tokens, 34);
        assert_eq!(resp.tool_uses()[0].1, "bash");
    }

    #[test]
    fn parse_response_skips_thinking_blocks() {
        let value = serde_json::json!({
            "content": [
                { "type": "thinking", "thinking": "hmm" },
                { "type": "text", "text": "answer" },
            ],
            "stop_reason": "end_turn",
            "usage": {},
        });
        let resp = parse_response(&value).unwrap();
        assert_eq!(resp.blocks.len(), 1);
    }

    #[test]
    fn parse_response_null_tool_input_becomes_object() {
        let value = serde_json::json!({
            "content": [
                { "type": "tool_use", "id": "x", "name": "edit", "input": null },
            ],
            "stop_reason": "tool_use",
            "usage": {},
        });
        let resp = parse_response(&value).unwrap();
        assert_eq!(*resp.tool_uses()[0].2, serde_json::json!({}));
    }

    #[test]
    fn parse_response_missing_content_is_invalid() {
        let value = serde_json::json!({ "stop_reason": "end_turn" });
        assert!(matches!(
            parse_response(&value),
            Err(ModelError::InvalidResponse(_))
        ));
    }
}
