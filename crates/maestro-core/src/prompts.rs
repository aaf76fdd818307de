// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System-prompt assembly: conventions prefix, base prompt, policy
//! preamble, optional retrieved-knowledge section.

/// Base prompt for the top-level agent that owns the user conversation.
pub const ORCHESTRATOR_PROMPT: &str = "\
You are the lead agent of a multi-agent system working on software \
engineering and business tasks. You own the conversation with the user: \
break the request down, do simple work yourself with your tools, and \
delegate focused sub-tasks to specialists when that is faster or safer. \
Keep the user's task as the single goal; do not invent side quests.";

/// Base prompt for specialist subagents running in isolated contexts.
pub const SPECIALIST_PROMPT: &str = "\
You are a specialist subagent. You receive one focused task with limited \
context and must complete it with your tools. You cannot ask the caller \
questions. End with a compact summary of what you did and any artifacts \
you produced; the summary is all the caller will see.";

/// Standing policy appended to every agent system prompt: how to use tools,
/// how autonomous to be, and when to stop.
const POLICY_PREAMBLE: &str = "\
## Working rules

Tool usage:
- Prefer direct tools over shell equivalents when both exist.
- Make one tool call at a time and read its result before the next.
- Report tool failures honestly and adapt; do not repeat a failing call \
unchanged more than twice.

Autonomy:
- Proceed without asking when the next step follows from the task.
- Stop and explain when an action is destructive or outside the task scope.

Completion:
- The task is done when its outcome is verified, not when code is written.
- Finish with a short summary of what changed and what was verified.";

/// Merge the system prompt in fixed order: conventions, base prompt,
/// policy preamble, then any retrieved knowledge.  Conventions come first
/// so user rules outrank everything else in the prefix cache.
pub fn build_system_prompt(
    conventions: Option<&str>,
    base_prompt: &str,
    knowledge_section: Option<&str>,
) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(4);
    if let Some(conv) = conventions {
        if !conv.trim().is_empty() {
            parts.push(conv);
        }
    }
    parts.push(base_prompt);
    parts.push(POLICY_PREAMBLE);
    if let Some(knowledge) = knowledge_section {
        if !knowledge.trim().is_empty() {
            parts.push(knowledge);
        }
    }
    parts.join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventions_come_first() {
        let prompt = build_system_prompt(Some("house rules"), "you are an agent", None);
        assert!(prompt.starts_with("house rules"));
        let conv = prompt.find("house rules").unwrap();
        let base = prompt.find("you are an agent").unwrap();
        let policy = prompt.find("## Working rules").unwrap();
        assert!(conv < base && base < policy);
    }

    #[test]
    fn empty_conventions_are_skipped() {
        let prompt = build_system_prompt(Some("   "), "base", None);
        assert!(prompt.starts_with("base"));
    }

    #[test]
    fn knowledge_section_lands_last() {
        let prompt = build_system_prompt(None, "base", Some("## Relevant past knowledge\n- x"));
        assert!(prompt.ends_with("- x"));
    }
}
