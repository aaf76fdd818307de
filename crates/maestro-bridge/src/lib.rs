// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod routes;
mod server;
mod state;

pub use routes::router;
pub use server::serve;
pub use state::BridgeState;
