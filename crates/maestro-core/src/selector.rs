// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;

use lru::LruCache;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use maestro_config::{ModelConfig, ModelTier, SelectorConfig, ThinkingBudget};
use maestro_model::{Message, ModelProvider, ModelRequest};

/// Classifier verdict about one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Mechanical,
    Implementation,
    Strategic,
}

/// The selector's answer for one model call.
#[derive(Debug, Clone)]
pub struct Selection {
    pub tier: ModelTier,
    pub thinking: ThinkingBudget,
    pub task_type: TaskType,
    pub rationale: String,
}

/// Structured classifier answer, parsed strictly from the model's JSON.
#[derive(Debug, Deserialize)]
struct ClassifierAnswer {
    tier: ModelTier,
    thinking: ThinkingBudget,
    task_type: TaskType,
    #[serde(default)]
    rationale: String,
}

const CLASSIFIER_PROMPT: &str = "\
You are a routing classifier for an agent system. Read the task below and \
judge it on one question: would a stronger model produce a materially \
different result than a weaker one?

Classify the task:
- task_type: \"mechanical\" (rote edits, file operations, running known \
commands), \"implementation\" (writing or changing code with local \
reasoning), or \"strategic\" (architecture, planning, ambiguous goals).
- tier: \"small\" when a stronger model would not change the outcome, \
\"mid\" for ordinary implementation work, \"large\" only when deep \
reasoning materially improves the result.
- thinking: \"off\", \"low\", \"medium\", or \"high\" extended-reasoning \
budget.

Answer with EXACTLY one JSON object and nothing else:
{\"tier\": \"...\", \"thinking\": \"...\", \"task_type\": \"...\", \
\"rationale\": \"one short sentence\"}";

/// Chooses a model tier and thinking budget per call by asking the small
/// tier to classify the task content.  No keyword heuristics, no model
/// names read from user input.  Decisions are cached by
/// (task-text hash, attempt) so tight loops never classify twice.
pub struct SmartSelector {
    provider: Arc<dyn ModelProvider>,
    models: ModelConfig,
    cfg: SelectorConfig,
    cache: Mutex<LruCache<(String, u32), Selection>>,
}

impl SmartSelector {
    pub fn new(provider: Arc<dyn ModelProvider>, models: ModelConfig, cfg: SelectorConfig) -> Self {
        let capacity = NonZeroUsize::new(cfg.cache_size.max(1)).unwrap();
        Self {
            provider,
            models,
            cfg,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The fallback used when classification fails or is disabled.
    fn default_selection() -> Selection {
        Selection {
            tier: ModelTier::Mid,
            thinking: ThinkingBudget::Low,
            task_type: TaskType::Implementation,
            rationale: "classifier unavailable; using the middle of the road".into(),
        }
    }

    /// Pick `{tier, thinking}` for `task_text` at retry `attempt`.
    ///
    /// Escalation on retries steps tier first, then budget:
    /// attempt 1 → one tier up and at least a low budget;
    /// attempt 2+ → the large tier at high budget.
    pub async fn select(
        &self,
        task_text: &str,
        phase_hint: Option<&str>,
        attempt: u32,
    ) -> Selection {
        let key = (task_hash(task_text), attempt);
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            return cached.clone();
        }

        let base = if self.cfg.fixed_mid {
            Self::default_selection()
        } else {
            self.classify(task_text, phase_hint).await
        };
        let selection = escalate(base, attempt);

        self.cache.lock().unwrap().put(key, selection.clone());
        selection
    }

    async fn classify(&self, task_text: &str, phase_hint: Option<&str>) -> Selection {
        let mut user = String::new();
        if let Some(hint) = phase_hint {
            user.push_str(&format!("Phase: {hint}\n\n"));
        }
        user.push_str("Task:\n");
        user.push_str(task_text);

        let req = ModelRequest {
            model: self.models.small.clone(),
            system: CLASSIFIER_PROMPT.to_string(),
            messages: vec![Message::user(user)],
            max_tokens: 256,
            ..Default::default()
        };

        match self.provider.complete(req).await {
            Ok(resp) => {
                let text: String = resp
                    .blocks
                    .iter()
                    .filter_map(|b| match b {
                        maestro_model::ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                match parse_answer(&text) {
                    Some(answer) => {
                        debug!(tier = %answer.tier, ?answer.task_type, "classifier verdict");
                        Selection {
                            tier: answer.tier,
                            thinking: answer.thinking,
                            task_type: answer.task_type,
                            rationale: answer.rationale,
                        }
                    }
                    None => {
                        warn!("classifier answer did not parse; using default selection");
                        Self::default_selection()
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "classifier call failed; using default selection");
                Self::default_selection()
            }
        }
    }
}

/// Apply the retry escalation contract to a base selection.
fn escalate(base: Selection, attempt: u32) -> Selection {
    match attempt {
        0 => base,
        1 => Selection {
            tier: base.tier.escalate(),
            thinking: base.thinking.max(ThinkingBudget::Low),
            ..base
        },
        _ => Selection {
            tier: ModelTier::Large,
            thinking: ThinkingBudget::High,
            ..base
        },
    }
}

/// Extract the first JSON object from the classifier's text and parse it.
fn parse_answer(text: &str) -> Option<ClassifierAnswer> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn task_hash(text: &str) -> String {
    hex::encode(&Sha256::digest(text.as_bytes())[..16])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
