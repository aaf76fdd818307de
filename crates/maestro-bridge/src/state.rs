// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::info;
use uuid::Uuid;

use maestro_config::Config;
use maestro_core::{LiveSession, Orchestrator};
use maestro_store::SessionStore;

/// Shared server state: the session registry plus the orchestrator that
/// runs tasks.  Live sessions are created lazily from disk and kept for
/// the process lifetime so SSE subscribers and runs share one object.
pub struct BridgeState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionStore>,
    live: Mutex<HashMap<String, Arc<LiveSession>>>,
    current: Mutex<String>,
}

impl BridgeState {
    /// Open the registry, resuming the most recent session or creating a
    /// fresh one.
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionStore>,
        orchestrator: Arc<Orchestrator>,
    ) -> anyhow::Result<Arc<Self>> {
        let state = Arc::new(Self {
            config,
            orchestrator,
            sessions: sessions.clone(),
            live: Mutex::new(HashMap::new()),
            current: Mutex::new(String::new()),
        });
        let initial = match sessions.list()?.first() {
            Some(meta) => meta.id.clone(),
            None => state.create_session()?,
        };
        *state.current.lock().unwrap() = initial.clone();
        info!(session = %initial, "bridge opened");
        Ok(state)
    }

    pub fn current_id(&self) -> String {
        self.current.lock().unwrap().clone()
    }

    /// The active session, loading it from disk on first touch.
    pub fn current_session(&self) -> anyhow::Result<Arc<LiveSession>> {
        let id = self.current_id();
        self.session(&id)
    }

    pub fn session(&self, id: &str) -> anyhow::Result<Arc<LiveSession>> {
        if let Some(live) = self.live.lock().unwrap().get(id) {
            return Ok(live.clone());
        }
        let dir = self.sessions.open(id)?;
        let live = Arc::new(LiveSession::new(dir, self.config.bridge.sse_queue_depth)?);
        self.live
            .lock()
            .unwrap()
            .insert(id.to_string(), live.clone());
        Ok(live)
    }

    pub fn create_session(&self) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        let dir = self.sessions.create(&id)?;
        let live = Arc::new(LiveSession::new(dir, self.config.bridge.sse_queue_depth)?);
        self.live.lock().unwrap().insert(id.clone(), live);
        Ok(id)
    }

    pub fn switch_session(&self, id: &str) -> anyhow::Result<()> {
        anyhow::ensure!(self.sessions.exists(id), "no such session: {id}");
        *self.current.lock().unwrap() = id.to_string();
        Ok(())
    }

    pub fn delete_session(&self, id: &str) -> anyhow::Result<()> {
        {
            let live = self.live.lock().unwrap();
            if let Some(session) = live.get(id) {
                anyhow::ensure!(!session.is_running(), "session is running; stop it first");
            }
        }
        self.sessions.delete(id)?;
        self.live.lock().unwrap().remove(id);
        // Deleting the current session falls back to (or creates) another.
        if self.current_id() == id {
            let next = match self.sessions.list()?.first() {
                Some(meta) => meta.id.clone(),
                None => self.create_session()?,
            };
            *self.current.lock().unwrap() = next;
        }
        Ok(())
    }

    pub fn list_sessions(&self) -> anyhow::Result<Vec<serde_json::Value>> {
        let current = self.current_id();
        let metas = self.sessions.list().context("listing sessions")?;
        Ok(metas
            .into_iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "createdAt": m.created_at,
                    "lastActive": m.last_active,
                    "messageCount": m.message_count,
                    "isCurrent": m.id == current,
                })
            })
            .collect())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
