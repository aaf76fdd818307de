// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod anthropic;
mod error;
pub mod mock;
mod provider;
mod types;

pub use anthropic::AnthropicClient;
pub use error::ModelError;
pub use provider::ModelProvider;
pub use types::{
    ContentBlock, ImageSource, Message, ModelRequest, ModelResponse, Role, StopReason,
    ToolResultPart, ToolSchema, Usage,
};
