// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Folder-backed hierarchical task tree.
//!
//! Folder location is the single source of truth for parent-child: a task in
//! `tasks/` is a root; a task in `tasks/<parent>/tasks/<child>/` is a child.
//! `parent_id` inside `task.json` is normalized to the folder-derived parent
//! on every read and write, which eliminates metadata/filesystem divergence.
//! Each root folder carries an aggregated `project_data.json` snapshot that
//! is rebuilt from a fresh walk on every write within the subtree.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Normalized to the folder-derived parent; `None` for roots.
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub file_refs: Vec<String>,
}

/// Fields for task creation.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub priority: Option<TaskPriority>,
    pub notes: String,
    pub tags: Vec<String>,
    pub assignee: Option<String>,
    /// Parent task id; `None` creates a root.
    pub parent: Option<String>,
}

/// Partial update applied by [`TaskStore::update`].
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub assignee: Option<Option<String>>,
    pub add_file_ref: Option<String>,
}

/// One node of the aggregated snapshot tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTreeNode {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub children: Vec<TaskTreeNode>,
}

/// Aggregated counts for a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub blocked: usize,
    pub cancelled: usize,
}

impl ProjectSummary {
    fn count(&mut self, status: TaskStatus) {
        self.total += 1;
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Blocked => self.blocked += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Snapshot file written into each root task folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RootSnapshot {
    root_id: String,
    generated_at: DateTime<Utc>,
    counts: ProjectSummary,
    tree: TaskTreeNode,
}

/// Folder name: `sanitize(title)-id[:8]`.  Stable across moves because the
/// id suffix never changes.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-');
    let mut s = trimmed.to_string();
    s.truncate(40);
    if s.is_empty() {
        s.push_str("task");
    }
    s
}

pub struct TaskStore {
    projects_root: PathBuf,
}

impl TaskStore {
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let projects_root = root.as_ref().join("projects");
        fs::create_dir_all(&projects_root)?;
        Ok(Self { projects_root })
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    fn tasks_dir(&self, project: &str) -> PathBuf {
        self.projects_root.join(project).join(".planning").join("tasks")
    }

    /// Every project with a `.planning` directory, by name.
    pub fn projects(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.projects_root.is_dir() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.projects_root)? {
            let entry = entry?;
            if entry.path().join(".planning").is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn create(&self, project: &str, new: NewTask) -> anyhow::Result<Task> {
        let id = Uuid::new_v4().to_string();
        let parent_dir = match &new.parent {
            Some(parent_id) => {
                let parent_folder = self
                    .find_folder(project, parent_id)?
                    .with_context(|| format!("parent task not found: {parent_id}"))?;
                parent_folder.join("tasks")
            }
            None => self.tasks_dir(project),
        };
        fs::create_dir_all(&parent_dir)?;

        let folder = parent_dir.join(format!("{}-{}", sanitize_title(&new.title), &id[..8]));
        fs::create_dir_all(&folder)?;

        let now = Utc::now();
        let task = Task {
            id,
            title: new.title,
            status: TaskStatus::Pending,
            priority: new.priority.unwrap_or(TaskPriority::Medium),
            parent_id: new.parent,
            created_at: now,
            updated_at: now,
            notes: new.notes,
            tags: new.tags,
            assignee: new.assignee,
            file_refs: Vec::new(),
        };
        write_task(&folder, &task)?;
        self.touch_project_meta(project)?;
        self.rebuild_snapshot_for(project, &folder)?;
        Ok(task)
    }

    pub fn get(&self, project: &str, id: &str) -> anyhow::Result<Task> {
        let folder = self
            .find_folder(project, id)?
            .with_context(|| format!("task not found: {id}"))?;
        self.load_normalized(project, &folder)
    }

    pub fn update(&self, project: &str, id: &str, patch: TaskPatch) -> anyhow::Result<Task> {
        let folder = self
            .find_folder(project, id)?
            .with_context(|| format!("task not found: {id}"))?;
        let mut task = self.load_normalized(project, &folder)?;
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(notes) = patch.notes {
            task.notes = notes;
        }
        if let Some(tags) = patch.tags {
            task.tags = tags;
        }
        if let Some(assignee) = patch.assignee {
            task.assignee = assignee;
        }
        if let Some(file_ref) = patch.add_file_ref {
            if !task.file_refs.contains(&file_ref) {
                task.file_refs.push(file_ref);
            }
        }
        task.updated_at = Utc::now();
        write_task(&folder, &task)?;
        self.rebuild_snapshot_for(project, &folder)?;
        Ok(task)
    }

    /// Relocate a task folder under a new parent (or to the project root).
    /// Moving to the current location is a no-op.
    pub fn move_task(
        &self,
        project: &str,
        id: &str,
        new_parent: Option<&str>,
    ) -> anyhow::Result<Task> {
        let folder = self
            .find_folder(project, id)?
            .with_context(|| format!("task not found: {id}"))?;
        let old_root = self.root_ancestor(project, &folder);

        let dest_dir = match new_parent {
            Some(parent_id) => {
                let parent_folder = self
                    .find_folder(project, parent_id)?
                    .with_context(|| format!("parent task not found: {parent_id}"))?;
                anyhow::ensure!(
                    !parent_folder.starts_with(&folder),
                    "cannot move a task under its own subtree"
                );
                parent_folder.join("tasks")
            }
            None => self.tasks_dir(project),
        };
        let folder_name = folder.file_name().unwrap().to_os_string();
        let dest = dest_dir.join(&folder_name);

        if dest != folder {
            fs::create_dir_all(&dest_dir)?;
            fs::rename(&folder, &dest)
                .with_context(|| format!("moving {} -> {}", folder.display(), dest.display()))?;
        }

        let mut task = self.load_normalized(project, &dest)?;
        task.updated_at = Utc::now();
        write_task(&dest, &task)?;

        // Both affected subtrees get fresh snapshots.
        if let Some(old_root) = old_root {
            if old_root.is_dir() {
                self.write_snapshot(project, &old_root)?;
            }
        }
        self.rebuild_snapshot_for(project, &dest)?;
        Ok(task)
    }

    /// Soft delete: remove the task folder (and its subtree).
    pub fn delete(&self, project: &str, id: &str) -> anyhow::Result<()> {
        let folder = self
            .find_folder(project, id)?
            .with_context(|| format!("task not found: {id}"))?;
        let root = self.root_ancestor(project, &folder);
        fs::remove_dir_all(&folder)?;
        if let Some(root) = root {
            if root.is_dir() {
                self.write_snapshot(project, &root)?;
            }
        }
        Ok(())
    }

    /// All tasks in a project, parents before children.
    pub fn list(&self, project: &str) -> anyhow::Result<Vec<Task>> {
        let dir = self.tasks_dir(project);
        let mut tasks = Vec::new();
        if !dir.is_dir() {
            return Ok(tasks);
        }
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && entry.file_name() == "task.json" {
                let folder = entry.path().parent().unwrap().to_path_buf();
                tasks.push(self.load_normalized(project, &folder)?);
            }
        }
        Ok(tasks)
    }

    pub fn summary(&self, project: &str) -> anyhow::Result<ProjectSummary> {
        let mut summary = ProjectSummary::default();
        for task in self.list(project)? {
            summary.count(task.status);
        }
        Ok(summary)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Locate a task folder by id.  The id suffix in the folder name makes
    /// this a name match for well-formed trees; `task.json` is consulted as
    /// the fallback for folders renamed by hand.
    fn find_folder(&self, project: &str, id: &str) -> anyhow::Result<Option<PathBuf>> {
        let dir = self.tasks_dir(project);
        if !dir.is_dir() {
            return Ok(None);
        }
        let short = &id[..id.len().min(8)];
        for entry in WalkDir::new(&dir) {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(&format!("-{short}")) {
                let task_file = entry.path().join("task.json");
                if task_file.is_file() {
                    let task: Task = serde_json::from_str(&fs::read_to_string(&task_file)?)?;
                    if task.id == id {
                        return Ok(Some(entry.path().to_path_buf()));
                    }
                }
            }
        }
        // Fallback: folder was renamed; scan task.json contents.
        for entry in WalkDir::new(&dir) {
            let entry = entry?;
            if entry.file_type().is_file() && entry.file_name() == "task.json" {
                let task: Task = serde_json::from_str(&fs::read_to_string(entry.path())?)?;
                if task.id == id {
                    return Ok(Some(entry.path().parent().unwrap().to_path_buf()));
                }
            }
        }
        Ok(None)
    }

    /// The parent task id derived from folder location: the grandparent
    /// folder's `task.json`, when the grandparent is itself a task folder.
    fn folder_parent_id(&self, project: &str, folder: &Path) -> Option<String> {
        let tasks_root = self.tasks_dir(project);
        let parent = folder.parent()?; // ".../tasks"
        if parent == tasks_root {
            return None;
        }
        let grandparent = parent.parent()?; // the parent task folder
        let task_file = grandparent.join("task.json");
        let task: Task = serde_json::from_str(&fs::read_to_string(task_file).ok()?).ok()?;
        Some(task.id)
    }

    /// Read a task and normalize `parent_id` to the folder-derived value.
    fn load_normalized(&self, project: &str, folder: &Path) -> anyhow::Result<Task> {
        let data = fs::read_to_string(folder.join("task.json"))
            .with_context(|| format!("reading task.json in {}", folder.display()))?;
        let mut task: Task = serde_json::from_str(&data)?;
        task.parent_id = self.folder_parent_id(project, folder);
        Ok(task)
    }

    /// The root ancestor folder of a task folder (itself, for roots).
    fn root_ancestor(&self, project: &str, folder: &Path) -> Option<PathBuf> {
        let tasks_root = self.tasks_dir(project);
        let mut current = folder.to_path_buf();
        loop {
            let parent = current.parent()?;
            if parent == tasks_root {
                return Some(current);
            }
            // Step from ".../<task>/tasks/<child>" up to ".../<task>".
            current = parent.parent()?.to_path_buf();
        }
    }

    fn rebuild_snapshot_for(&self, project: &str, folder: &Path) -> anyhow::Result<()> {
        if let Some(root) = self.root_ancestor(project, folder) {
            self.write_snapshot(project, &root)?;
        }
        Ok(())
    }

    /// Rebuild a root's aggregated snapshot from a fresh walk of its
    /// subtree.  The snapshot is advisory and stale-tolerant — it is never
    /// read back as a source of truth.
    fn write_snapshot(&self, project: &str, root_folder: &Path) -> anyhow::Result<()> {
        let tree = self.build_tree(project, root_folder)?;
        let mut counts = ProjectSummary::default();
        count_tree(&tree, &mut counts);
        let snapshot = RootSnapshot {
            root_id: tree.id.clone(),
            generated_at: Utc::now(),
            counts,
            tree,
        };
        fs::write(
            root_folder.join("project_data.json"),
            serde_json::to_vec_pretty(&snapshot)?,
        )?;
        Ok(())
    }

    fn build_tree(&self, project: &str, folder: &Path) -> anyhow::Result<TaskTreeNode> {
        let task = self.load_normalized(project, folder)?;
        let mut children = Vec::new();
        let nested = folder.join("tasks");
        if nested.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(&nested)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir() && p.join("task.json").is_file())
                .collect();
            entries.sort();
            for child in entries {
                children.push(self.build_tree(project, &child)?);
            }
        }
        Ok(TaskTreeNode {
            id: task.id,
            title: task.title,
            status: task.status,
            children,
        })
    }

    fn touch_project_meta(&self, project: &str) -> anyhow::Result<()> {
        let planning = self.projects_root.join(project).join(".planning");
        fs::create_dir_all(&planning)?;
        let meta_path = planning.join("project_meta.json");
        let meta = serde_json::json!({
            "name": project,
            "updated_at": Utc::now(),
        });
        fs::write(meta_path, serde_json::to_vec_pretty(&meta)?)?;
        Ok(())
    }
}

fn write_task(folder: &Path, task: &Task) -> anyhow::Result<()> {
    fs::write(folder.join("task.json"), serde_json::to_vec_pretty(task)?)?;
    Ok(())
}

fn count_tree(node: &TaskTreeNode, counts: &mut ProjectSummary) {
    counts.count(node.status);
    for child in &node.children {
        count_tree(child, counts);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
