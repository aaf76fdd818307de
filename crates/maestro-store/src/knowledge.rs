// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-project persistent store of typed notes with search.
//!
//! One file per entry under `knowledge/<type>/<id>.json`, plus an
//! `index.json` that is purely an acceleration structure: it is regenerable
//! from the entry files at any time and is rebuilt wholesale on writes.
//! Auto-capture never deletes entries; deletion is a manual operation.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tasks::{TaskPatch, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    TechnicalDecision,
    Learning,
    Pattern,
    Reference,
    Context,
    BestPractice,
    LessonLearned,
}

impl KnowledgeType {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::TechnicalDecision => "technical_decision",
            Self::Learning => "learning",
            Self::Pattern => "pattern",
            Self::Reference => "reference",
            Self::Context => "context",
            Self::BestPractice => "best_practice",
            Self::LessonLearned => "lesson_learned",
        }
    }

    pub fn all() -> &'static [KnowledgeType] {
        &[
            Self::TechnicalDecision,
            Self::Learning,
            Self::Pattern,
            Self::Reference,
            Self::Context,
            Self::BestPractice,
            Self::LessonLearned,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    Manual,
    AutoCaptured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub project: String,
    pub title: String,
    #[serde(rename = "type")]
    pub entry_type: KnowledgeType,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub linked_tasks: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub source: KnowledgeSource,
}

impl KnowledgeEntry {
    pub fn new(
        project: impl Into<String>,
        title: impl Into<String>,
        entry_type: KnowledgeType,
        content: impl Into<String>,
        tags: Vec<String>,
        source: KnowledgeSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project: project.into(),
            title: title.into(),
            entry_type,
            content: content.into(),
            tags,
            linked_tasks: Vec::new(),
            created_at: Utc::now(),
            source,
        }
    }
}

/// Per-type entry counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeSummary {
    pub total: usize,
    pub by_type: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRow {
    id: String,
    title: String,
    #[serde(rename = "type")]
    entry_type: KnowledgeType,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    path: PathBuf,
}

pub struct KnowledgeStore {
    projects_root: PathBuf,
}

impl KnowledgeStore {
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let projects_root = root.as_ref().join("projects");
        fs::create_dir_all(&projects_root)?;
        Ok(Self { projects_root })
    }

    fn knowledge_dir(&self, project: &str) -> PathBuf {
        self.projects_root
            .join(project)
            .join(".planning")
            .join("knowledge")
    }

    pub fn add(&self, entry: &KnowledgeEntry) -> anyhow::Result<()> {
        let dir = self
            .knowledge_dir(&entry.project)
            .join(entry.entry_type.dir_name());
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", entry.id));
        fs::write(&path, serde_json::to_vec_pretty(entry)?)
            .with_context(|| format!("writing {}", path.display()))?;
        self.rebuild_index(&entry.project)?;
        Ok(())
    }

    pub fn get(&self, project: &str, id: &str) -> anyhow::Result<KnowledgeEntry> {
        for row in self.load_index(project)? {
            if row.id == id {
                let data = fs::read_to_string(&row.path)?;
                return Ok(serde_json::from_str(&data)?);
            }
        }
        anyhow::bail!("knowledge entry not found: {id}")
    }

    pub fn list(&self, project: &str) -> anyhow::Result<Vec<KnowledgeEntry>> {
        let mut entries = Vec::new();
        for row in self.load_index(project)? {
            let data = fs::read_to_string(&row.path)?;
            entries.push(serde_json::from_str(&data)?);
        }
        Ok(entries)
    }

    /// Rank entries by recency-weighted substring/tag match and return the
    /// top `k`.  Scoring is deterministic: ties break by recency, then id.
    pub fn search(&self, project: &str, query: &str, k: usize) -> anyhow::Result<Vec<KnowledgeEntry>> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let mut scored: Vec<(f64, KnowledgeEntry)> = Vec::new();
        for entry in self.list(project)? {
            let mut score = 0.0;
            if entry.title.to_lowercase().contains(&needle) {
                score += 3.0;
            }
            if entry.tags.iter().any(|t| t.to_lowercase() == needle) {
                score += 2.0;
            }
            if entry.content.to_lowercase().contains(&needle) {
                score += 1.0;
            }
            if score == 0.0 {
                continue;
            }
            let age_days = (now - entry.created_at).num_seconds().max(0) as f64 / 86_400.0;
            let recency = 1.0 / (1.0 + age_days / 30.0);
            scored.push((score * recency, entry));
        }
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        Ok(scored.into_iter().take(k).map(|(_, e)| e).collect())
    }

    /// Link an entry and a task in both directions: the entry records the
    /// task id, the task records the entry file path.
    pub fn link(
        &self,
        project: &str,
        entry_id: &str,
        task_id: &str,
        tasks: &TaskStore,
    ) -> anyhow::Result<()> {
        let mut entry = self.get(project, entry_id)?;
        if !entry.linked_tasks.contains(&task_id.to_string()) {
            entry.linked_tasks.push(task_id.to_string());
            let path = self
                .knowledge_dir(project)
                .join(entry.entry_type.dir_name())
                .join(format!("{}.json", entry.id));
            fs::write(&path, serde_json::to_vec_pretty(&entry)?)?;
        }
        let entry_ref = format!(
            "knowledge/{}/{}.json",
            entry.entry_type.dir_name(),
            entry.id
        );
        tasks.update(
            project,
            task_id,
            TaskPatch {
                add_file_ref: Some(entry_ref),
                ..TaskPatch::default()
            },
        )?;
        Ok(())
    }

    pub fn summary(&self, project: &str) -> anyhow::Result<KnowledgeSummary> {
        let index = self.load_index(project)?;
        let mut summary = KnowledgeSummary {
            total: index.len(),
            by_type: Vec::new(),
        };
        for t in KnowledgeType::all() {
            let n = index.iter().filter(|r| r.entry_type == *t).count();
            if n > 0 {
                summary.by_type.push((t.dir_name().to_string(), n));
            }
        }
        Ok(summary)
    }

    /// Projects ordered by most recent knowledge activity.
    pub fn recent_projects(&self, limit: usize) -> anyhow::Result<Vec<String>> {
        let mut stamped: Vec<(DateTime<Utc>, String)> = Vec::new();
        if !self.projects_root.is_dir() {
            return Ok(Vec::new());
        }
        for dir_entry in fs::read_dir(&self.projects_root)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().to_string();
            let index = self.load_index(&name).unwrap_or_default();
            if let Some(latest) = index.iter().map(|r| r.created_at).max() {
                stamped.push((latest, name));
            }
        }
        stamped.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(stamped.into_iter().take(limit).map(|(_, n)| n).collect())
    }

    /// Regenerate `index.json` from the entry files.
    pub fn rebuild_index(&self, project: &str) -> anyhow::Result<()> {
        let dir = self.knowledge_dir(project);
        let mut rows: Vec<IndexRow> = Vec::new();
        for t in KnowledgeType::all() {
            let type_dir = dir.join(t.dir_name());
            if !type_dir.is_dir() {
                continue;
            }
            for file in fs::read_dir(&type_dir)? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let entry: KnowledgeEntry = match fs::read_to_string(&path)
                    .ok()
                    .and_then(|d| serde_json::from_str(&d).ok())
                {
                    Some(e) => e,
                    None => continue,
                };
                rows.push(IndexRow {
                    id: entry.id,
                    title: entry.title,
                    entry_type: entry.entry_type,
                    tags: entry.tags,
                    created_at: entry.created_at,
                    path: path.clone(),
                });
            }
        }
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("index.json"), serde_json::to_vec_pretty(&rows)?)?;
        Ok(())
    }

    fn load_index(&self, project: &str) -> anyhow::Result<Vec<IndexRow>> {
        let path = self.knowledge_dir(project).join("index.json");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data).unwrap_or_default())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
