// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable state under a single root directory.  A cold restart
//! reconstructs every session, task tree, and knowledge base from disk
//! alone.
//!
//! Layout:
//!
//! ```text
//! <root>/sessions/<id>/transcript.jsonl
//! <root>/sessions/<id>/metadata.json
//! <root>/sessions/<id>/tool_log.jsonl
//! <root>/sessions/<id>/CLAUDE.md
//! <root>/projects/<name>/.planning/project_meta.json
//! <root>/projects/<name>/.planning/knowledge/index.json
//! <root>/projects/<name>/.planning/knowledge/<type>/<id>.json
//! <root>/projects/<name>/.planning/tasks/<folder>/task.json
//! <root>/projects/<name>/.planning/tasks/<folder>/project_data.json
//! ```
mod conventions;
mod knowledge;
mod session;
mod tasks;
mod workqueue;

pub use conventions::{merge_conventions, ConventionScopes};
pub use knowledge::{
    KnowledgeEntry, KnowledgeSource, KnowledgeStore, KnowledgeSummary, KnowledgeType,
};
pub use session::{SessionDir, SessionMeta, SessionStore, ToolCallRecord, ToolOutcome};
pub use tasks::{
    sanitize_title, NewTask, ProjectSummary, Task, TaskPatch, TaskPriority, TaskStatus, TaskStore,
    TaskTreeNode,
};
pub use workqueue::{WorkItem, WorkItemState, WorkQueue};
