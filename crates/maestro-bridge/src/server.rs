// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use maestro_store::WorkQueue;

use crate::{router, BridgeState};

/// Bind and serve the HTTP surface until the process exits.
///
/// CORS is permissive because the bridge only binds loopback by default;
/// a remote deployment fronts this with its own proxy.
pub async fn serve(state: Arc<BridgeState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bridge.host, state.config.bridge.port);

    if state.config.improve.mine_every_ticks > 0 {
        tokio::spawn(background_miner(state.clone()));
    }

    let app = router(state).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "bridge listening");
    axum::serve(listener, app).await.context("serving bridge")?;
    Ok(())
}

/// Long-running improvement pass: every `mine_every_ticks` loop ticks
/// (one tick per second), scan the current session's tool-log tail for
/// recurring tool sequences and error classes and enqueue low-priority
/// work items.
async fn background_miner(state: Arc<BridgeState>) {
    let queue = match WorkQueue::new(state.config.store.root_dir()) {
        Ok(q) => q,
        Err(e) => {
            warn!(error = %e, "background miner disabled: no work queue");
            return;
        }
    };
    let mut ticks: u64 = 0;
    let interval = state.config.improve.mine_every_ticks;
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        ticks += 1;
        if ticks % interval != 0 {
            continue;
        }
        let Ok(session) = state.current_session() else {
            continue;
        };
        let project = state.orchestrator.project().to_string();
        let records = match session.store().load_tool_records() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "background miner could not read tool log");
                continue;
            }
        };
        match state
            .orchestrator
            .improve()
            .background_pass(&records, &queue, &project)
        {
            Ok(0) => {}
            Ok(n) => info!(enqueued = n, "background miner queued improvement work"),
            Err(e) => warn!(error = %e, "background miner pass failed"),
        }
    }
}
