// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless explicitly
/// disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default, rename = "loop")]
    pub loop_: LoopConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub improve: ImproveConfig,
}

/// A model capability tier.  The smart selector maps task content onto a
/// tier; the concrete model name for each tier comes from [`ModelConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Small,
    Mid,
    Large,
}

impl ModelTier {
    /// The next tier up, saturating at [`ModelTier::Large`].
    pub fn escalate(self) -> Self {
        match self {
            Self::Small => Self::Mid,
            Self::Mid | Self::Large => Self::Large,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Mid => write!(f, "mid"),
            Self::Large => write!(f, "large"),
        }
    }
}

/// Extended-reasoning budget granted to a single model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingBudget {
    Off,
    Low,
    Medium,
    High,
}

impl ThinkingBudget {
    /// Token allotment sent to the provider for this budget level.
    pub fn tokens(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Low => 2_048,
            Self::Medium => 8_192,
            Self::High => 24_576,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model name used for the `small` tier (also runs the selector classifier).
    pub small: String,
    /// Model name used for the `mid` tier.
    pub mid: String,
    /// Model name used for the `large` tier.
    pub large: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: String,
    /// Base URL override.  Useful for local proxies or gateways.
    pub base_url: Option<String>,
    /// Output-token allotment per completion, before thinking.  When a
    /// call carries an extended-reasoning budget, that budget is added on
    /// top so the response allotment is never consumed by thinking.
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            small: "claude-haiku".into(),
            mid: "claude-sonnet".into(),
            large: "claude-opus".into(),
            api_key_env: "MAESTRO_API_KEY".into(),
            base_url: None,
            max_tokens: 8_192,
        }
    }
}

impl ModelConfig {
    /// Resolve a tier to its configured model name.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Small => &self.small,
            ModelTier::Mid => &self.mid,
            ModelTier::Large => &self.large,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Classifier decisions cached per (task hash, attempt).  Bounds memory
    /// while preventing duplicate classifier calls in tight loops.
    pub cache_size: usize,
    /// Disable the classifier entirely and always return the mid tier.
    /// Used by tests and constrained deployments.
    #[serde(default)]
    pub fixed_mid: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            cache_size: 256,
            fixed_mid: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum model-call iterations for one sampling-loop run.
    pub iteration_cap: u32,
    /// Hard wall-clock deadline for one run, in seconds.
    pub deadline_secs: u64,
    /// Total retry budget for transport errors, in seconds.
    pub retry_budget_secs: u64,
    /// Initial backoff for retriable transport errors, in milliseconds.
    pub retry_initial_ms: u64,
    /// Identical consecutive tool errors before a repeated-error event fires.
    pub repeated_error_threshold: u32,
    /// Orchestrator-level re-attempts for a failed step.
    pub max_attempts: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            iteration_cap: 25,
            deadline_secs: 15 * 60,
            retry_budget_secs: 60,
            retry_initial_ms: 500,
            repeated_error_threshold: 3,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum subagents running concurrently.  Excess tasks wait FIFO.
    pub max_concurrent: usize,
    /// Maximum delegation recursion depth.
    pub max_depth: u32,
    /// Subagent summaries longer than this are truncated (bytes).
    pub summary_cap_bytes: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_depth: 3,
            summary_cap_bytes: 2_048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum image blocks kept across the message list.
    pub max_images: usize,
    /// Oldest images are removed in multiples of this chunk size, so the
    /// provider-side prompt-cache prefix is invalidated as rarely as possible.
    pub removal_chunk_size: usize,
    /// The first N messages are never modified by compaction.
    pub prefix_preserve_count: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_images: 10,
            removal_chunk_size: 5,
            prefix_preserve_count: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Default per-tool execution timeout, in seconds.
    pub timeout_secs: u64,
    /// Rule patterns that block matching tool calls outright.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Shell commands fired as pre/post hooks, keyed by phase name.
    #[serde(default)]
    pub hook_commands: Vec<HookCommandConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            deny_patterns: vec!["rm -rf /*".into()],
            hook_commands: Vec::new(),
        }
    }
}

/// One externally configured hook: a shell command run at a given phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookCommandConfig {
    /// Phase name: "pre_tool" | "post_tool" | "on_error" |
    /// "on_session_start" | "on_session_end".
    pub phase: String,
    /// Command executed with the hook event JSON on stdin.
    pub command: String,
    /// Pre-tool only: a non-zero exit vetoes the tool call.
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Per-subscriber SSE queue depth; oldest frames drop on overflow.
    pub sse_queue_depth: usize,
    /// SSE keepalive comment interval, in seconds.
    pub keepalive_secs: u64,
    /// Worker threads for blocking dashboard file I/O.
    pub workers: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8765,
            sse_queue_depth: 64,
            keepalive_secs: 30,
            workers: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for all durable state (sessions, projects).
    /// Defaults to `~/.maestro` when unset.
    pub root: Option<PathBuf>,
    /// Directory holding specialist role definitions (`roles/<name>.md`)
    /// and optional hook/rule markdown.  Defaults to `<root>/config`.
    pub config_dir: Option<PathBuf>,
    /// Enterprise-scope conventions file merged first into the prompt prefix.
    pub enterprise_conventions: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: None,
            config_dir: None,
            enterprise_conventions: None,
        }
    }
}

impl StoreConfig {
    /// Resolved state root: configured path or `~/.maestro`.
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".maestro")
        })
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_dir
            .clone()
            .unwrap_or_else(|| self.root_dir().join("config"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImproveConfig {
    /// Capture knowledge entries after every run.
    #[serde(default = "default_true")]
    pub capture: bool,
    /// Iteration count at which a successful run also records a complexity note.
    pub complex_run_iterations: u32,
    /// Keywords extracted from task text for retrieval.
    pub max_keywords: usize,
    /// Recent projects scanned during retrieval.
    pub max_projects: usize,
    /// Entries injected into the planning prompt.
    pub max_entries: usize,
    /// Captured content longer than this is truncated before storage (bytes).
    pub content_cap_bytes: usize,
    /// Background mining pass interval, in loop ticks.  0 disables mining.
    #[serde(default)]
    pub mine_every_ticks: u64,
}

impl Default for ImproveConfig {
    fn default() -> Self {
        Self {
            capture: true,
            complex_run_iterations: 10,
            max_keywords: 5,
            max_projects: 10,
            max_entries: 10,
            content_cap_bytes: 4_096,
            mine_every_ticks: 100,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
