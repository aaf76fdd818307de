// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic mock providers for tests.  No network access; every
//! end-to-end scenario is expressible as a script of canned responses.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    ContentBlock, ModelError, ModelProvider, ModelRequest, ModelResponse, StopReason, Usage,
};

type ScriptEntry = Result<ModelResponse, ModelError>;

/// A pre-scripted provider.  Each `complete` call pops the next entry from
/// the front of the script, so tests can specify exact response sequences —
/// including tool calls and transport errors.
pub struct ScriptedProvider {
    script: Mutex<Vec<ScriptEntry>>,
    /// Every request seen, in order, for test inspection.
    pub requests: Arc<Mutex<Vec<ModelRequest>>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ScriptEntry>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Arc::new(Mutex::new(Vec::new())),
            calls: AtomicU32::new(0),
        }
    }

    /// Provider that answers every call with the same text.
    pub fn always_text(text: impl Into<String>) -> Self {
        let t = text.into();
        Self::new(vec![Ok(ModelResponse::text(t))])
    }

    /// Round 1: one tool call.  Round 2: a text reply.
    pub fn tool_use_then_text(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Ok(ModelResponse {
                blocks: vec![ContentBlock::tool_use(id, name, input)],
                stop_reason: StopReason::ToolUse,
                usage: Usage::default(),
            }),
            Ok(ModelResponse::text(final_text)),
        ])
    }

    /// Number of `complete` calls made so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The last request seen, if any.
    pub fn last_request(&self) -> Option<ModelRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn complete(&self, req: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            // Scripts exhausted — answer with a terminal text reply so loops
            // that over-run their script still converge.
            return Ok(ModelResponse::text("[script exhausted]"));
        }
        script.remove(0)
    }
}

/// A provider that never stops calling tools.  Used to exercise the
/// iteration cap.
pub struct EndlessToolUseProvider {
    tool_name: String,
    calls: AtomicU32,
}

impl EndlessToolUseProvider {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for EndlessToolUseProvider {
    fn name(&self) -> &str {
        "endless-mock"
    }

    async fn complete(&self, _req: ModelRequest) -> Result<ModelResponse, ModelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ModelResponse {
            blocks: vec![ContentBlock::tool_use(
                format!("tc_{n}"),
                &self.tool_name,
                serde_json::json!({}),
            )],
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        })
    }
}

/// Fails the first `n` calls with a retriable error, then delegates to the
/// inner script.  Exercises the backoff path without real timeouts.
pub struct FailNTimesProvider {
    remaining: AtomicU32,
    inner: ScriptedProvider,
}

impl FailNTimesProvider {
    pub fn new(n: u32, inner: ScriptedProvider) -> Self {
        Self {
            remaining: AtomicU32::new(n),
            inner,
        }
    }
}

#[async_trait]
impl ModelProvider for FailNTimesProvider {
    fn name(&self) -> &str {
        "flaky-mock"
    }

    async fn complete(&self, req: ModelRequest) -> Result<ModelResponse, ModelError> {
        let prev = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if v > 0 {
                    Some(v - 1)
                } else {
                    None
                }
            });
        if prev.is_ok() {
            return Err(ModelError::Overloaded);
        }
        self.inner.complete(req).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn req() -> ModelRequest {
        ModelRequest {
            model: "test".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scripted_pops_in_order() {
        let p = ScriptedProvider::new(vec![
            Ok(ModelResponse::text("first")),
            Ok(ModelResponse::text("second")),
        ]);
        let a = p.complete(req()).await.unwrap();
        let b = p.complete(req()).await.unwrap();
        assert_eq!(a.blocks[0], ContentBlock::text("first"));
        assert_eq!(b.blocks[0], ContentBlock::text("second"));
        assert_eq!(p.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_records_requests() {
        let p = ScriptedProvider::always_text("ok");
        p.complete(req()).await.unwrap();
        assert_eq!(p.last_request().unwrap().model, "test");
    }

    #[tokio::test]
    async fn exhausted_script_returns_terminal_text() {
        let p = ScriptedProvider::new(vec![]);
        let r = p.complete(req()).await.unwrap();
        assert!(!r.has_tool_uses());
    }

    #[tokio::test]
    async fn endless_provider_always_emits_tool_use() {
        let p = EndlessToolUseProvider::new("bash");
        for _ in 0..3 {
            assert!(p.complete(req()).await.unwrap().has_tool_uses());
        }
        assert_eq!(p.call_count(), 3);
    }

    #[tokio::test]
    async fn fail_n_times_then_succeeds() {
        let p = FailNTimesProvider::new(2, ScriptedProvider::always_text("recovered"));
        assert!(p.complete(req()).await.is_err());
        assert!(p.complete(req()).await.is_err());
        let ok = p.complete(req()).await.unwrap();
        assert_eq!(ok.blocks[0], ContentBlock::text("recovered"));
    }
}
