// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Transport and protocol errors from the LLM RPC, classified so the
/// sampling loop can decide between retry-with-backoff and terminating the
/// run.
#[derive(Debug, Error)]
pub enum ModelError {
    /// HTTP 429 — the provider asked us to slow down.
    #[error("rate limited{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 503/529 — the provider is shedding load.
    #[error("provider overloaded")]
    Overloaded,

    /// Connection-level failure: DNS, TLS, reset, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 401/403 — bad or missing API key.  Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP 400 — the request itself is malformed.  Never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The provider answered 200 but the body did not match the expected
    /// schema.  Never retried; surfaces as a session error.
    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(s) => format!(" (retry after {s}s)"),
        None => String::new(),
    }
}

impl ModelError {
    /// Whether the sampling loop should retry this error with backoff.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Overloaded | Self::Network(_)
        )
    }

    /// Short stable label used in logs and knowledge entries.
    pub fn class(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Overloaded => "overloaded",
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::BadRequest(_) => "bad_request",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
