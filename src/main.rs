// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use maestro_core::{LiveSession, Orchestrator, RunStatus};
use maestro_model::AnthropicClient;
use maestro_store::{ConventionScopes, KnowledgeStore, SessionStore, TaskStore};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match maestro_config::load(cli.config.as_deref()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("config error: {e:#}");
            return ExitCode::from(3);
        }
    };

    // Async work runs on tokio's multi-thread scheduler; the bounded
    // blocking pool is the worker pool for dashboard file I/O.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.bridge.workers.max(1))
        .build()
        .expect("tokio runtime");

    match runtime.block_on(run(cli, config)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(3)
        }
    }
}

async fn run(cli: Cli, config: Arc<maestro_config::Config>) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(config.as_ref()).unwrap_or_default());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Sessions => {
            let sessions = SessionStore::new(config.store.root_dir())?;
            for meta in sessions.list()? {
                println!(
                    "{}  {}  {} messages  [{}]",
                    meta.id, meta.last_active, meta.message_count, meta.status
                );
            }
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let orchestrator = build_orchestrator(&cli, config.clone())?;

    match cli.command {
        Commands::Serve => {
            let sessions = Arc::new(SessionStore::new(config.store.root_dir())?);
            let state = maestro_bridge::BridgeState::new(config, sessions, orchestrator)?;
            maestro_bridge::serve(state).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { task } => {
            let sessions = SessionStore::new(config.store.root_dir())?;
            let id = format!("cli-{}", uuid::Uuid::new_v4());
            let session = Arc::new(LiveSession::new(
                sessions.create(&id)?,
                config.bridge.sse_queue_depth,
            )?);
            let outcome = orchestrator.handle_task(session.clone(), &task).await;

            for message in session.messages() {
                let text = message.text();
                if !text.trim().is_empty() {
                    println!("{text}\n");
                }
            }
            eprintln!(
                "[{}] {} iterations in {:.1}s",
                outcome.status.as_str(),
                outcome.iterations,
                outcome.duration_secs
            );
            Ok(match outcome.status {
                RunStatus::Completed => ExitCode::SUCCESS,
                RunStatus::Cancelled => ExitCode::from(1),
                RunStatus::CapReached => ExitCode::from(2),
                _ => ExitCode::from(3),
            })
        }
        Commands::Sessions | Commands::ShowConfig => unreachable!("handled above"),
    }
}

fn build_orchestrator(
    cli: &Cli,
    config: Arc<maestro_config::Config>,
) -> anyhow::Result<Arc<Orchestrator>> {
    let root = config.store.root_dir();
    let workspace = match &cli.workspace {
        Some(w) => w.clone(),
        None => std::env::current_dir().context("resolving workspace")?,
    };

    let api_key = std::env::var(&config.model.api_key_env).unwrap_or_default();
    let provider = Arc::new(AnthropicClient::new(api_key, config.model.base_url.clone()));

    let conventions = ConventionScopes {
        enterprise: config.store.enterprise_conventions.clone(),
        project: Some(workspace.join("CLAUDE.md")),
        directory: Some(workspace.join(".maestro").join("CLAUDE.md")),
    };

    Ok(Orchestrator::new(
        config.clone(),
        provider,
        Arc::new(SessionStore::new(&root)?),
        Arc::new(TaskStore::new(&root)?),
        Arc::new(KnowledgeStore::new(&root)?),
        conventions,
        workspace,
        cli.project.clone(),
    ))
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "maestro=debug,info" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
