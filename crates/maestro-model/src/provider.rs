// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{ModelError, ModelRequest, ModelResponse};

/// A chat-completion RPC endpoint.
///
/// The core never depends on provider-specific behaviour beyond this trait:
/// one request in, one ordered block list out.  Retry policy lives in the
/// sampling loop, not here — providers classify errors, callers decide.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display and logs.
    fn name(&self) -> &str;

    /// Send a completion request and await the full response.
    async fn complete(&self, req: ModelRequest) -> Result<ModelResponse, ModelError>;
}
