// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Self-improvement: capture knowledge after every run, retrieve it before
//! planning, and mine the tool log for recurring patterns in the
//! background.  Capture runs unconditionally on the hot path's tail;
//! retrieval is opt-in per orchestrator entry.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use maestro_config::ImproveConfig;
use maestro_store::{
    KnowledgeEntry, KnowledgeSource, KnowledgeStore, KnowledgeType, ToolCallRecord, ToolOutcome,
    WorkQueue,
};

use crate::events::{RunOutcome, RunStatus};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "into", "is", "it", "its", "of", "on", "or", "our", "so", "that", "the", "their", "then",
    "there", "these", "they", "this", "to", "was", "we", "were", "will", "with", "you", "your",
    "please", "make", "using", "use", "do", "does", "can", "could", "should", "would",
];

/// Lowercase, strip punctuation, drop stopwords and single characters,
/// dedupe preserving first occurrence.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for raw in text.split_whitespace() {
        let word: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if word.len() < 2 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !seen.contains(&word) {
            seen.push(word);
        }
    }
    seen
}

/// Patterns mined from the tool log.
#[derive(Debug, Clone, Default)]
pub struct LogInsights {
    /// Three-tool sequences seen at least three times, with their counts.
    pub sequences: Vec<(Vec<String>, usize)>,
    /// Most frequent error classes, highest first (top 5).
    pub top_errors: Vec<(String, usize)>,
}

/// The learning half of the system: everything here appends knowledge or
/// queue items, never mutates the transcript.
pub struct ImproveHooks {
    knowledge: Arc<KnowledgeStore>,
    cfg: ImproveConfig,
}

impl ImproveHooks {
    pub fn new(knowledge: Arc<KnowledgeStore>, cfg: ImproveConfig) -> Self {
        Self { knowledge, cfg }
    }

    /// Post-task capture, fired after every sampling-loop termination.
    ///
    /// Success stores a `pattern` entry; long successful runs add a
    /// `learning` note about complexity; failures (including cap
    /// exhaustion) store a `lesson_learned` with the error class.
    /// Cancellation is not an error and captures nothing.
    pub fn capture_run(&self, project: &str, role: &str, task_text: &str, outcome: &RunOutcome) {
        if !self.cfg.capture {
            return;
        }
        let short_task: String = task_text.chars().take(80).collect();
        let entries: Vec<KnowledgeEntry> = match outcome.status {
            RunStatus::Completed => {
                let mut tags = vec![role.to_string(), "success".to_string()];
                tags.extend(outcome.tools_used.iter().take(5).cloned());
                tags.dedup();
                let content = redact(
                    &format!(
                        "Task: {task_text}\nTools used: {}\nIterations: {}\nDuration: {:.1}s\nOutcome: completed",
                        outcome.tools_used.join(", "),
                        outcome.iterations,
                        outcome.duration_secs,
                    ),
                    self.cfg.content_cap_bytes,
                );
                let mut entries = vec![KnowledgeEntry::new(
                    project,
                    format!("Completed: {short_task}"),
                    KnowledgeType::Pattern,
                    content,
                    tags,
                    KnowledgeSource::AutoCaptured,
                )];
                if outcome.iterations >= self.cfg.complex_run_iterations {
                    entries.push(KnowledgeEntry::new(
                        project,
                        format!("High-iteration task: {short_task}"),
                        KnowledgeType::Learning,
                        format!(
                            "This task needed {} iterations; treat similar requests as \
                             complex and consider splitting them before delegation.",
                            outcome.iterations
                        ),
                        vec![role.to_string(), "complexity".to_string()],
                        KnowledgeSource::AutoCaptured,
                    ));
                }
                entries
            }
            RunStatus::Error | RunStatus::CapReached => {
                let error_class = match outcome.status {
                    RunStatus::CapReached => "cap_reached".to_string(),
                    _ => outcome
                        .error
                        .as_deref()
                        .and_then(|e| e.rsplit('(').next())
                        .map(|s| s.trim_end_matches(')').to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                };
                let content = redact(
                    &format!(
                        "Task: {task_text}\nError class: {error_class}\nDetail: {}\n\
                         Recommendation: retry with retrieved knowledge and an escalated model tier.",
                        outcome.error.as_deref().unwrap_or("(none)"),
                    ),
                    self.cfg.content_cap_bytes,
                );
                vec![KnowledgeEntry::new(
                    project,
                    format!("Failed: {short_task}"),
                    KnowledgeType::LessonLearned,
                    content,
                    vec![role.to_string(), "failure".to_string(), error_class],
                    KnowledgeSource::AutoCaptured,
                )]
            }
            _ => Vec::new(),
        };

        for entry in entries {
            if let Err(e) = self.knowledge.add(&entry) {
                warn!(project, error = %e, "failed to store captured knowledge");
            }
        }
    }

    /// Pre-task retrieval: search recent projects for entries matching the
    /// task keywords and return up to `max_entries`, ranked.
    pub fn retrieve(&self, task_text: &str) -> Vec<KnowledgeEntry> {
        let keywords: Vec<String> = extract_keywords(task_text)
            .into_iter()
            .take(self.cfg.max_keywords)
            .collect();
        if keywords.is_empty() {
            return Vec::new();
        }
        let projects = match self.knowledge.recent_projects(self.cfg.max_projects) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "knowledge retrieval failed to list projects");
                return Vec::new();
            }
        };

        let mut collected: Vec<KnowledgeEntry> = Vec::new();
        for project in &projects {
            for keyword in &keywords {
                match self.knowledge.search(project, keyword, self.cfg.max_entries) {
                    Ok(hits) => {
                        for hit in hits {
                            if !collected.iter().any(|e| e.id == hit.id) {
                                collected.push(hit);
                            }
                        }
                    }
                    Err(e) => debug!(project, keyword, error = %e, "search failed"),
                }
            }
        }
        collected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        collected.truncate(self.cfg.max_entries);
        collected
    }

    /// Format retrieved entries as the planning-prompt section.
    pub fn knowledge_section(entries: &[KnowledgeEntry]) -> Option<String> {
        if entries.is_empty() {
            return None;
        }
        let mut lines = vec!["## Relevant past knowledge".to_string(), String::new()];
        for entry in entries {
            let excerpt: String = entry.content.chars().take(200).collect();
            lines.push(format!("- **{}** ({}): {excerpt}", entry.title, entry.entry_type.dir_name()));
        }
        Some(lines.join("\n"))
    }

    /// Mine a tool-log tail for recurring 3-tool sequences and the most
    /// frequent error classes.
    pub fn analyze_tool_log(records: &[ToolCallRecord]) -> LogInsights {
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let mut sequence_counts: HashMap<Vec<String>, usize> = HashMap::new();
        for window in names.windows(3) {
            let key: Vec<String> = window.iter().map(|s| s.to_string()).collect();
            *sequence_counts.entry(key).or_insert(0) += 1;
        }
        let mut sequences: Vec<(Vec<String>, usize)> = sequence_counts
            .into_iter()
            .filter(|(_, count)| *count >= 3)
            .collect();
        sequences.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut error_counts: HashMap<String, usize> = HashMap::new();
        for record in records {
            if record.outcome == ToolOutcome::Error {
                let class = record
                    .error_class
                    .clone()
                    .unwrap_or_else(|| "tool_error".into());
                *error_counts.entry(class).or_insert(0) += 1;
            }
        }
        let mut top_errors: Vec<(String, usize)> = error_counts.into_iter().collect();
        top_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_errors.truncate(5);

        LogInsights {
            sequences,
            top_errors,
        }
    }

    /// Background pass: turn log insights into low-priority work items.
    /// Only meaningful when a long-running daemon drains the queue.
    pub fn background_pass(
        &self,
        records: &[ToolCallRecord],
        queue: &WorkQueue,
        project: &str,
    ) -> anyhow::Result<usize> {
        let insights = Self::analyze_tool_log(records);
        let mut enqueued = 0;
        for (sequence, count) in &insights.sequences {
            queue.enqueue(
                format!(
                    "candidate compound tool for project {project}: {} (seen {count}x)",
                    sequence.join(" -> ")
                ),
                1,
                0,
            )?;
            enqueued += 1;
        }
        for (class, count) in &insights.top_errors {
            queue.enqueue(
                format!("recurring tool error class '{class}' in project {project} ({count}x)"),
                1,
                0,
            )?;
            enqueued += 1;
        }
        Ok(enqueued)
    }
}

/// Strip long opaque runs (base64 blobs, data URLs) and cap the length.
/// Captured knowledge should carry conclusions, not payloads.
fn redact(content: &str, cap: usize) -> String {
    let mut out = String::with_capacity(content.len().min(cap));
    for token in content.split_inclusive(char::is_whitespace) {
        let trimmed = token.trim();
        if trimmed.len() > 120 && !trimmed.contains('/') {
            out.push_str("[redacted-blob] ");
        } else if trimmed.starts_with("data:") && trimmed.contains("base64") {
            out.push_str("[redacted-data-url] ");
        } else {
            out.push_str(token);
        }
    }
    if out.len() > cap {
        let mut cut = cap;
        while cut > 0 && !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("…");
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use maestro_store::SessionStore;
    use tempfile::TempDir;

    fn hooks() -> (TempDir, ImproveHooks, Arc<KnowledgeStore>) {
        let tmp = TempDir::new().unwrap();
        let knowledge = Arc::new(KnowledgeStore::new(tmp.path()).unwrap());
        let hooks = ImproveHooks::new(knowledge.clone(), ImproveConfig::default());
        (tmp, hooks, knowledge)
    }

    fn outcome(status: RunStatus, iterations: u32) -> RunOutcome {
        RunOutcome {
            status,
            iterations,
            tools_used: vec!["edit".into(), "bash".into()],
            error: (status == RunStatus::Error).then(|| "network error: reset (network)".into()),
            duration_secs: 4.2,
        }
    }

    #[test]
    fn keywords_drop_stopwords_and_punctuation() {
        let kw = extract_keywords("Please create a file named hello.txt, then verify it!");
        assert_eq!(kw, vec!["create", "file", "named", "hellotxt", "verify"]);
    }

    #[test]
    fn keywords_dedupe_preserving_order() {
        let kw = extract_keywords("deploy deploy the deploy script");
        assert_eq!(kw, vec!["deploy", "script"]);
    }

    /// Capture then retrieve: the stored pattern entry comes back for an
    /// overlapping task, injected into the planning section.
    #[test]
    fn success_capture_then_retrieval_round_trip() {
        let (_tmp, hooks, knowledge) = hooks();
        hooks.capture_run(
            "demo",
            "developer",
            "implement the factorial function in utils",
            &outcome(RunStatus::Completed, 4),
        );
        let all = knowledge.list("demo").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].entry_type, KnowledgeType::Pattern);
        assert!(all[0].tags.contains(&"developer".to_string()));
        assert!(all[0].tags.contains(&"success".to_string()));

        let retrieved = hooks.retrieve("extend the factorial helper");
        assert_eq!(retrieved.len(), 1);
        let section = ImproveHooks::knowledge_section(&retrieved).unwrap();
        assert!(section.contains("Relevant past knowledge"));
        assert!(section.contains("factorial"));
    }

    #[test]
    fn long_success_also_stores_learning() {
        let (_tmp, hooks, knowledge) = hooks();
        hooks.capture_run(
            "demo",
            "developer",
            "big refactor",
            &outcome(RunStatus::Completed, 12),
        );
        let all = knowledge.list("demo").unwrap();
        assert_eq!(all.len(), 2);
        assert!(all
            .iter()
            .any(|e| e.entry_type == KnowledgeType::Learning));
    }

    #[test]
    fn failure_stores_lesson_with_error_class_tag() {
        let (_tmp, hooks, knowledge) = hooks();
        hooks.capture_run(
            "demo",
            "developer",
            "flaky deploy",
            &outcome(RunStatus::Error, 2),
        );
        let all = knowledge.list("demo").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].entry_type, KnowledgeType::LessonLearned);
        assert!(all[0].tags.contains(&"network".to_string()));
    }

    #[test]
    fn cancellation_captures_nothing() {
        let (_tmp, hooks, knowledge) = hooks();
        hooks.capture_run(
            "demo",
            "developer",
            "stopped early",
            &outcome(RunStatus::Cancelled, 1),
        );
        assert!(knowledge.list("demo").unwrap().is_empty());
    }

    #[test]
    fn retrieval_caps_entries() {
        let (_tmp, hooks, _knowledge) = hooks();
        for i in 0..20 {
            hooks.capture_run(
                "demo",
                "developer",
                &format!("deploy service number {i}"),
                &outcome(RunStatus::Completed, 2),
            );
        }
        let retrieved = hooks.retrieve("deploy the service again");
        assert!(retrieved.len() <= ImproveConfig::default().max_entries);
    }

    #[test]
    fn redact_strips_blobs_and_caps_length() {
        let blob = "A".repeat(500);
        let text = format!("result was {blob} done");
        let out = redact(&text, 4096);
        assert!(out.contains("[redacted-blob]"));
        assert!(!out.contains(&blob));

        let long = "word ".repeat(2000);
        assert!(redact(&long, 100).len() <= 104);
    }

    fn record(name: &str, outcome: ToolOutcome, class: Option<&str>) -> ToolCallRecord {
        ToolCallRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: "s".into(),
            name: name.into(),
            input: serde_json::json!({}),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            outcome,
            error_class: class.map(String::from),
        }
    }

    #[test]
    fn mining_finds_triple_sequences_and_top_errors() {
        let mut records = Vec::new();
        // The sequence edit -> bash -> edit appears 3 times.
        for _ in 0..3 {
            records.push(record("edit", ToolOutcome::Ok, None));
            records.push(record("bash", ToolOutcome::Ok, None));
            records.push(record("edit", ToolOutcome::Ok, None));
        }
        records.push(record("bash", ToolOutcome::Error, Some("timeout")));
        records.push(record("bash", ToolOutcome::Error, Some("timeout")));
        records.push(record("edit", ToolOutcome::Error, Some("not_found")));

        let insights = ImproveHooks::analyze_tool_log(&records);
        assert!(insights
            .sequences
            .iter()
            .any(|(seq, count)| seq == &vec!["edit".to_string(), "bash".into(), "edit".into()]
                && *count >= 3));
        assert_eq!(insights.top_errors[0].0, "timeout");
        assert_eq!(insights.top_errors[0].1, 2);
    }

    #[test]
    fn background_pass_enqueues_work_items() {
        let tmp = TempDir::new().unwrap();
        let knowledge = Arc::new(KnowledgeStore::new(tmp.path()).unwrap());
        let hooks = ImproveHooks::new(knowledge, ImproveConfig::default());
        let queue = WorkQueue::new(tmp.path()).unwrap();
        // Session store shares the root; reuse it for realistic records.
        let _sessions = SessionStore::new(tmp.path()).unwrap();

        let mut records = Vec::new();
        for _ in 0..3 {
            records.push(record("edit", ToolOutcome::Ok, None));
            records.push(record("bash", ToolOutcome::Ok, None));
            records.push(record("edit", ToolOutcome::Ok, None));
        }
        let enqueued = hooks.background_pass(&records, &queue, "demo").unwrap();
        assert!(enqueued >= 1);
        let items = queue.load().unwrap();
        assert!(items.iter().any(|i| i.task.contains("compound tool")));
        // Low priority.
        assert!(items.iter().all(|i| i.priority == 1));
    }
}
