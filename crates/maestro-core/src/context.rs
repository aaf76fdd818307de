// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use maestro_config::ContextConfig;
use maestro_model::{ContentBlock, Message, ToolResultPart};

/// Statistics over a message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    pub image_count: usize,
    pub approx_tokens: usize,
    pub compactions_performed: usize,
}

/// Keeps the request payload within the image budget while preserving the
/// prompt-cache prefix.
///
/// Policy: at most `max_images` image blocks across the message list.  When
/// exceeded, the oldest images are replaced — in multiples of
/// `removal_chunk_size`, so the cacheable prefix is invalidated as rarely
/// as possible — by a short text placeholder referencing the thumbnail id.
/// Text is never removed, the first `prefix_preserve_count` messages are
/// never modified, and tool_use/tool_result pairing stays intact because a
/// tool result's image parts collapse to text parts in place.
pub struct ContextManager {
    cfg: ContextConfig,
    compactions: AtomicUsize,
}

impl ContextManager {
    pub fn new(cfg: ContextConfig) -> Self {
        Self {
            cfg,
            compactions: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self, messages: &[Message]) -> ContextStats {
        ContextStats {
            image_count: count_images(messages),
            approx_tokens: messages.iter().map(|m| m.approx_tokens()).sum(),
            compactions_performed: self.compactions.load(Ordering::SeqCst),
        }
    }

    /// Idempotent when at or under the limit: the input comes back
    /// unchanged.  Deterministic: identical inputs produce identical
    /// outputs, including placeholder text.
    pub fn maybe_compact(&self, messages: Vec<Message>) -> Vec<Message> {
        let total = count_images(&messages);
        if total <= self.cfg.max_images {
            return messages;
        }

        let excess = total - self.cfg.max_images;
        let chunk = self.cfg.removal_chunk_size.max(1);
        // Remove in whole chunks so repeated small overflows do not nibble
        // at the prefix one image at a time.
        let to_remove = excess.div_ceil(chunk) * chunk;
        let to_remove = to_remove.min(total);

        let mut removed = 0usize;
        let mut result = messages;
        for (index, msg) in result.iter_mut().enumerate() {
            if removed >= to_remove {
                break;
            }
            if index < self.cfg.prefix_preserve_count {
                continue;
            }
            for block in msg.blocks.iter_mut() {
                if removed >= to_remove {
                    break;
                }
                match block {
                    ContentBlock::Image { source } => {
                        let placeholder = placeholder_text(&source.thumb_id());
                        *block = ContentBlock::text(placeholder);
                        removed += 1;
                    }
                    ContentBlock::ToolResult { content, .. } => {
                        for part in content.iter_mut() {
                            if removed >= to_remove {
                                break;
                            }
                            if let ToolResultPart::Image { source } = part {
                                let placeholder = placeholder_text(&source.thumb_id());
                                *part = ToolResultPart::Text { text: placeholder };
                                removed += 1;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        self.compactions.fetch_add(1, Ordering::SeqCst);
        debug!(removed, remaining = count_images(&result), "compacted context images");
        result
    }
}

fn placeholder_text(thumb_id: &str) -> String {
    format!("[screenshot trimmed from context; thumbnail {thumb_id}]")
}

fn count_images(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.image_count()).sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
