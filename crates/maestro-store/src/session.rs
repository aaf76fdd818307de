// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use maestro_model::Message;

/// Small metadata blob rewritten on each update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub message_count: usize,
    /// Active tool group name.
    pub tool_group: String,
    /// Terminal status of the last run: completed | cancelled | cap_reached |
    /// error — or "idle" before the first run.
    pub status: String,
}

impl SessionMeta {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_active: now,
            message_count: 0,
            tool_group: "default".into(),
            status: "idle".into(),
        }
    }
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Ok,
    Error,
}

/// One line of `tool_log.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: ToolOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
}

/// Store rooted at `<root>/sessions/`.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = root.as_ref().join("sessions");
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Create a fresh session directory with empty transcript and metadata.
    pub fn create(&self, id: &str) -> anyhow::Result<SessionDir> {
        let dir = self.dir.join(id);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let handle = SessionDir {
            id: id.to_string(),
            dir,
            meta_lock: Mutex::new(()),
        };
        handle.write_meta(&SessionMeta::new(id))?;
        Ok(handle)
    }

    /// Open an existing session directory.
    pub fn open(&self, id: &str) -> anyhow::Result<SessionDir> {
        let dir = self.dir.join(id);
        anyhow::ensure!(dir.is_dir(), "no such session: {id}");
        Ok(SessionDir {
            id: id.to_string(),
            dir,
            meta_lock: Mutex::new(()),
        })
    }

    pub fn exists(&self, id: &str) -> bool {
        self.dir.join(id).is_dir()
    }

    /// All session metadata, newest first.
    pub fn list(&self) -> anyhow::Result<Vec<SessionMeta>> {
        let mut metas = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.open(&id).and_then(|s| s.read_meta()) {
                Ok(meta) => metas.push(meta),
                Err(e) => warn!(session = %id, error = %e, "skipping unreadable session"),
            }
        }
        metas.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(metas)
    }

    /// Remove a session folder entirely.
    pub fn delete(&self, id: &str) -> anyhow::Result<()> {
        let dir = self.dir.join(id);
        anyhow::ensure!(dir.is_dir(), "no such session: {id}");
        fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
        Ok(())
    }
}

/// Handle to one session's on-disk state.
///
/// The transcript has a single writer (the session's sampling loop);
/// concurrent readers tolerate a truncated last line.  Metadata writes go
/// through write-temp-then-rename behind a per-session mutex.
pub struct SessionDir {
    pub id: String,
    dir: PathBuf,
    meta_lock: Mutex<()>,
}

impl SessionDir {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn transcript_path(&self) -> PathBuf {
        self.dir.join("transcript.jsonl")
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("metadata.json")
    }

    fn tool_log_path(&self) -> PathBuf {
        self.dir.join("tool_log.jsonl")
    }

    fn conventions_path(&self) -> PathBuf {
        self.dir.join("CLAUDE.md")
    }

    /// Append one message as a complete JSON line, flushed before return.
    pub fn append_message(&self, msg: &Message) -> anyhow::Result<()> {
        let line = serde_json::to_string(msg)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.transcript_path())?;
        writeln!(f, "{line}")?;
        f.flush()?;
        Ok(())
    }

    /// Load the full transcript.  A truncated trailing line (writer died
    /// mid-write) is skipped with a warning rather than failing the load.
    pub fn load_messages(&self) -> anyhow::Result<Vec<Message>> {
        let path = self.transcript_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut messages = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(m) => messages.push(m),
                Err(e) => {
                    warn!(session = %self.id, line = n + 1, error = %e,
                          "skipping unparsable transcript line");
                }
            }
        }
        Ok(messages)
    }

    /// Atomically replace `metadata.json`.
    pub fn write_meta(&self, meta: &SessionMeta) -> anyhow::Result<()> {
        let _guard = self.meta_lock.lock().unwrap();
        let tmp = self.dir.join(".metadata.json.tmp");
        let data = serde_json::to_vec_pretty(meta)?;
        fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, self.meta_path())?;
        Ok(())
    }

    pub fn read_meta(&self) -> anyhow::Result<SessionMeta> {
        let data = fs::read_to_string(self.meta_path())
            .with_context(|| format!("reading {}", self.meta_path().display()))?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Append one tool-log line, flushed before return.
    pub fn append_tool_record(&self, rec: &ToolCallRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(rec)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.tool_log_path())?;
        writeln!(f, "{line}")?;
        f.flush()?;
        Ok(())
    }

    pub fn load_tool_records(&self) -> anyhow::Result<Vec<ToolCallRecord>> {
        let path = self.tool_log_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(r) = serde_json::from_str(&line) {
                records.push(r);
            }
        }
        Ok(records)
    }

    /// Append a block to the session-scoped conventions file.
    pub fn append_conventions(&self, text: &str) -> anyhow::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.conventions_path())?;
        writeln!(f, "{text}")?;
        Ok(())
    }

    pub fn read_conventions(&self) -> Option<String> {
        fs::read_to_string(self.conventions_path()).ok()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
