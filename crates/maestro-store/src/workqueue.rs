// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemState {
    Pending,
    Active,
    Done,
    Failed,
}

/// One unit of background improvement work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub task: String,
    /// Higher runs first; ties run oldest-first.
    pub priority: i32,
    pub retries_remaining: u32,
    pub created_at: DateTime<Utc>,
    pub state: WorkItemState,
}

/// Append-log-backed queue for the background daemon.  Every state change
/// appends a full item record; the latest record per id wins on load.
/// The log is compacted opportunistically once finished items dominate:
/// `finish` rewrites it to one line per item (temp file + rename) whenever
/// it has grown past [`COMPACT_MIN_LINES`] with a finished majority.
pub struct WorkQueue {
    path: PathBuf,
}

/// Below this many log lines a rewrite is not worth the I/O.
const COMPACT_MIN_LINES: usize = 64;

impl WorkQueue {
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = root.as_ref().join("queue");
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join("work.jsonl"),
        })
    }

    pub fn enqueue(&self, task: impl Into<String>, priority: i32, retries: u32) -> anyhow::Result<WorkItem> {
        let item = WorkItem {
            id: Uuid::new_v4().to_string(),
            task: task.into(),
            priority,
            retries_remaining: retries,
            created_at: Utc::now(),
            state: WorkItemState::Pending,
        };
        self.append(&item)?;
        Ok(item)
    }

    /// Claim the highest-priority pending item, marking it active.
    pub fn claim(&self) -> anyhow::Result<Option<WorkItem>> {
        let mut items = self.load()?;
        items.retain(|i| i.state == WorkItemState::Pending);
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        match items.into_iter().next() {
            Some(mut item) => {
                item.state = WorkItemState::Active;
                self.append(&item)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Record the outcome of an active item.  A failure with retries left
    /// goes back to pending with the counter decremented.
    pub fn finish(&self, item: &WorkItem, success: bool) -> anyhow::Result<WorkItem> {
        let mut updated = item.clone();
        updated.state = if success {
            WorkItemState::Done
        } else if updated.retries_remaining > 0 {
            updated.retries_remaining -= 1;
            WorkItemState::Pending
        } else {
            WorkItemState::Failed
        };
        self.append(&updated)?;
        self.maybe_compact()?;
        Ok(updated)
    }

    /// Rewrite the log to the latest record per item when superseded lines
    /// and finished items dominate.  Keeps `work.jsonl` bounded by the
    /// live item count instead of the full state-change history.
    fn maybe_compact(&self) -> anyhow::Result<()> {
        let raw_lines = match fs::read_to_string(&self.path) {
            Ok(s) => s.lines().filter(|l| !l.trim().is_empty()).count(),
            Err(_) => return Ok(()),
        };
        if raw_lines < COMPACT_MIN_LINES {
            return Ok(());
        }
        let items = self.load()?;
        let finished = items
            .iter()
            .filter(|i| matches!(i.state, WorkItemState::Done | WorkItemState::Failed))
            .count();
        if raw_lines < items.len() * 2 || finished * 2 < items.len() {
            return Ok(());
        }
        let mut out = String::with_capacity(raw_lines * 64);
        for item in &items {
            out.push_str(&serde_json::to_string(item)?);
            out.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, out)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Latest state of every item.
    pub fn load(&self) -> anyhow::Result<Vec<WorkItem>> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut latest: Vec<WorkItem> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(item) = serde_json::from_str::<WorkItem>(&line) {
                if let Some(existing) = latest.iter_mut().find(|i| i.id == item.id) {
                    *existing = item;
                } else {
                    latest.push(item);
                }
            }
        }
        Ok(latest)
    }

    fn append(&self, item: &WorkItem) -> anyhow::Result<()> {
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(f, "{}", serde_json::to_string(item)?)?;
        f.flush()?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue() -> (TempDir, WorkQueue) {
        let tmp = TempDir::new().unwrap();
        let q = WorkQueue::new(tmp.path()).unwrap();
        (tmp, q)
    }

    #[test]
    fn claim_returns_highest_priority_first() {
        let (_tmp, q) = queue();
        q.enqueue("low", 1, 0).unwrap();
        let high = q.enqueue("high", 10, 0).unwrap();
        let claimed = q.claim().unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.state, WorkItemState::Active);
    }

    #[test]
    fn claim_on_empty_queue_is_none() {
        let (_tmp, q) = queue();
        assert!(q.claim().unwrap().is_none());
    }

    #[test]
    fn failed_item_with_retries_requeues() {
        let (_tmp, q) = queue();
        q.enqueue("job", 0, 2).unwrap();
        let claimed = q.claim().unwrap().unwrap();
        let after = q.finish(&claimed, false).unwrap();
        assert_eq!(after.state, WorkItemState::Pending);
        assert_eq!(after.retries_remaining, 1);
        // It can be claimed again.
        assert!(q.claim().unwrap().is_some());
    }

    #[test]
    fn failed_item_without_retries_is_terminal() {
        let (_tmp, q) = queue();
        q.enqueue("job", 0, 0).unwrap();
        let claimed = q.claim().unwrap().unwrap();
        let after = q.finish(&claimed, false).unwrap();
        assert_eq!(after.state, WorkItemState::Failed);
        assert!(q.claim().unwrap().is_none());
    }

    #[test]
    fn finished_majority_compacts_log() {
        let tmp = TempDir::new().unwrap();
        let q = WorkQueue::new(tmp.path()).unwrap();
        // 100 items, each enqueued, claimed, and finished: 300 appends of
        // history.  Compaction must keep the log well below that.
        for i in 0..100 {
            q.enqueue(format!("job {i}"), 0, 0).unwrap();
        }
        while let Some(item) = q.claim().unwrap() {
            q.finish(&item, true).unwrap();
        }

        let path = tmp.path().join("queue/work.jsonl");
        let lines = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count();
        assert!(
            lines < 150,
            "log kept {lines} of 300 appended lines; compaction did not fire"
        );
        assert!(lines >= 100, "compaction must keep one line per live item");

        // Nothing was lost: a fresh queue sees every item as done.
        let q2 = WorkQueue::new(tmp.path()).unwrap();
        let items = q2.load().unwrap();
        assert_eq!(items.len(), 100);
        assert!(items.iter().all(|i| i.state == WorkItemState::Done));
    }

    #[test]
    fn small_logs_are_left_uncompacted() {
        let tmp = TempDir::new().unwrap();
        let q = WorkQueue::new(tmp.path()).unwrap();
        q.enqueue("only job", 0, 0).unwrap();
        let item = q.claim().unwrap().unwrap();
        q.finish(&item, true).unwrap();

        // Three state changes, three lines: under the threshold the full
        // history stays.
        let path = tmp.path().join("queue/work.jsonl");
        let lines = fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 3);
    }

    #[test]
    fn state_survives_reload() {
        let tmp = TempDir::new().unwrap();
        {
            let q = WorkQueue::new(tmp.path()).unwrap();
            let item = q.enqueue("persisted", 5, 1).unwrap();
            let claimed = q.claim().unwrap().unwrap();
            assert_eq!(claimed.id, item.id);
            q.finish(&claimed, true).unwrap();
        }
        let q2 = WorkQueue::new(tmp.path()).unwrap();
        let items = q2.load().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].state, WorkItemState::Done);
    }
}
