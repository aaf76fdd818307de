// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tracing::warn;

use maestro_model::{ContentBlock, Message, Role, ToolResultPart};
use maestro_store::SessionDir;

use crate::events::RunStatus;

/// Cooperative cancellation handle shared between the bridge and the
/// sampling loop.  Setting it is idempotent; the loop checks it between
/// suspension points and stops issuing new model/tool calls.
#[derive(Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct SessionState {
    messages: Vec<Message>,
    status: RunStatus,
    last_error: Option<String>,
}

/// One user-visible conversation: in-memory messages, running flag,
/// cancellation token, and the SSE fan-out channel.  Durable state lives in
/// the wrapped [`SessionDir`]; everything else here is reconstructible.
pub struct LiveSession {
    pub id: String,
    store: SessionDir,
    state: Mutex<SessionState>,
    running: AtomicBool,
    cancel: Mutex<CancelToken>,
    /// Serialized session snapshots.  `broadcast` gives every subscriber a
    /// bounded queue with drop-oldest semantics on lag.
    events: broadcast::Sender<String>,
    tool_group: Mutex<String>,
}

impl LiveSession {
    /// Wrap a session directory, loading any existing transcript.
    pub fn new(store: SessionDir, sse_queue_depth: usize) -> anyhow::Result<Self> {
        let messages = store.load_messages()?;
        let meta = store.read_meta()?;
        let (events, _) = broadcast::channel(sse_queue_depth.max(1));
        Ok(Self {
            id: store.id.clone(),
            store,
            state: Mutex::new(SessionState {
                messages,
                status: RunStatus::Idle,
                last_error: None,
            }),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancelToken::new()),
            events,
            tool_group: Mutex::new(meta.tool_group),
        })
    }

    pub fn store(&self) -> &SessionDir {
        &self.store
    }

    pub fn tool_group(&self) -> String {
        self.tool_group.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RunStatus {
        self.state.lock().unwrap().status
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }

    /// Append to memory and transcript, then broadcast the new state.
    /// The transcript stays append-only; a persistence failure is surfaced
    /// to the caller (the in-memory copy is already updated, nothing is
    /// silently dropped).
    pub fn append_message(&self, msg: Message) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.messages.push(msg.clone());
        }
        self.store.append_message(&msg)?;
        self.broadcast();
        Ok(())
    }

    /// Replace the in-memory message list after compaction.  The transcript
    /// keeps the original, uncompacted history; compaction only shapes what
    /// is sent to the model.
    pub fn set_working_messages(&self, messages: Vec<Message>) {
        self.state.lock().unwrap().messages = messages;
    }

    /// Begin a run if none is active.  Returns `false` (the 409 path) when
    /// a run is already in flight.
    pub fn try_begin_run(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.status = RunStatus::Running;
            state.last_error = None;
        }
        // Fresh token per run; a stop request from a previous run must not
        // leak into this one.
        *self.cancel.lock().unwrap() = CancelToken::new();
        self.broadcast();
        true
    }

    pub fn end_run(&self, status: RunStatus, error: Option<String>) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = status;
            state.last_error = error;
        }
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.persist_meta() {
            warn!(session = %self.id, error = %e, "failed to persist session metadata");
        }
        self.broadcast();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.lock().unwrap().clone()
    }

    /// Idempotent stop request.
    pub fn request_stop(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    /// Serialize the current state and fan it out to all subscribers.
    /// Broadcast order matches state-change order because every mutation
    /// calls this while holding no locks out of order.
    pub fn broadcast(&self) {
        let frame = self.snapshot().to_string();
        // Err just means no subscribers, which is normal for CLI runs.
        let _ = self.events.send(frame);
    }

    /// UI-facing snapshot.  `display_messages` is derived from the message
    /// list alone, never persisted.
    pub fn snapshot(&self) -> Value {
        let state = self.state.lock().unwrap();
        json!({
            "id": self.id,
            "running": self.running.load(Ordering::SeqCst),
            "status": state.status.as_str(),
            "error": state.last_error,
            "messageCount": state.messages.len(),
            "messages": display_messages(&state.messages),
        })
    }

    fn persist_meta(&self) -> anyhow::Result<()> {
        let mut meta = self.store.read_meta()?;
        let state = self.state.lock().unwrap();
        meta.last_active = Utc::now();
        meta.message_count = state.messages.len();
        meta.status = state.status.as_str().to_string();
        meta.tool_group = self.tool_group();
        drop(state);
        self.store.write_meta(&meta)
    }
}

/// Project the raw block list into what the UI renders: text per message,
/// tool calls with their names, tool results with a short excerpt.
fn display_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match (m.role, m.is_tool_result()) {
                (Role::User, true) => "tool_result",
                (Role::User, false) => "user",
                (Role::Assistant, _) => "assistant",
            };
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();
            let mut tool_results = Vec::new();
            for block in &m.blocks {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text.clone()),
                    ContentBlock::Image { source } => {
                        text_parts.push(format!("[image {}]", source.thumb_id()))
                    }
                    ContentBlock::ToolUse { id, name, .. } => {
                        tool_calls.push(json!({ "id": id, "name": name }));
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        let excerpt: String = content
                            .iter()
                            .filter_map(|p| match p {
                                ToolResultPart::Text { text } => Some(text.as_str()),
                                ToolResultPart::Image { .. } => None,
                            })
                            .collect::<Vec<_>>()
                            .join("\n")
                            .chars()
                            .take(400)
                            .collect();
                        tool_results.push(json!({
                            "id": tool_use_id,
                            "excerpt": excerpt,
                            "isError": is_error,
                        }));
                    }
                }
            }
            json!({
                "role": role,
                "text": text_parts.join("\n"),
                "toolCalls": tool_calls,
                "toolResults": tool_results,
            })
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_store::SessionStore;
    use serde_json::json as j;
    use tempfile::TempDir;

    fn live() -> (TempDir, LiveSession) {
        let tmp = TempDir::new().unwrap();
        let sessions = SessionStore::new(tmp.path()).unwrap();
        let dir = sessions.create("s1").unwrap();
        let live = LiveSession::new(dir, 16).unwrap();
        (tmp, live)
    }

    #[test]
    fn cancel_token_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        // Clones observe the same flag.
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn try_begin_run_rejects_concurrent_runs() {
        let (_tmp, live) = live();
        assert!(live.try_begin_run());
        assert!(!live.try_begin_run());
        live.end_run(RunStatus::Completed, None);
        assert!(live.try_begin_run());
    }

    #[test]
    fn begin_run_resets_stale_cancel() {
        let (_tmp, live) = live();
        assert!(live.try_begin_run());
        live.request_stop();
        assert!(live.cancel_token().is_cancelled());
        live.end_run(RunStatus::Cancelled, None);
        assert!(live.try_begin_run());
        assert!(!live.cancel_token().is_cancelled());
    }

    #[test]
    fn append_persists_and_broadcasts() {
        let (_tmp, live) = live();
        let mut rx = live.subscribe();
        live.append_message(Message::user("hello")).unwrap();
        let frame = rx.try_recv().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["messageCount"], 1);
        // Durable too.
        assert_eq!(live.store().load_messages().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_projects_tool_blocks() {
        let (_tmp, live) = live();
        live.append_message(Message {
            role: Role::Assistant,
            blocks: vec![
                ContentBlock::text("on it"),
                ContentBlock::tool_use("tc_1", "bash", j!({"command": "ls"})),
            ],
        })
        .unwrap();
        live.append_message(Message::tool_results(vec![ContentBlock::tool_result(
            "tc_1", "file.txt",
        )]))
        .unwrap();

        let snap = live.snapshot();
        assert_eq!(snap["messages"][0]["role"], "assistant");
        assert_eq!(snap["messages"][0]["toolCalls"][0]["name"], "bash");
        assert_eq!(snap["messages"][1]["role"], "tool_result");
        assert_eq!(snap["messages"][1]["toolResults"][0]["excerpt"], "file.txt");
    }

    #[test]
    fn reload_from_disk_reproduces_messages() {
        let tmp = TempDir::new().unwrap();
        let sessions = SessionStore::new(tmp.path()).unwrap();
        {
            let live = LiveSession::new(sessions.create("s1").unwrap(), 16).unwrap();
            live.append_message(Message::user("persisted")).unwrap();
        }
        let reloaded = LiveSession::new(sessions.open("s1").unwrap(), 16).unwrap();
        assert_eq!(reloaded.message_count(), 1);
        assert_eq!(reloaded.messages()[0].text(), "persisted");
    }

    #[test]
    fn slow_subscriber_drops_oldest_frames() {
        let (_tmp, live) = live();
        let mut rx = live.subscribe();
        // Queue depth is 16; overflow it.
        for i in 0..40 {
            live.append_message(Message::user(format!("m{i}"))).unwrap();
        }
        // The receiver lags: the first recv reports the gap, then newest
        // frames are still readable.
        match rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(rx.try_recv().is_ok());
    }
}
