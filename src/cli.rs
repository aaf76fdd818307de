// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "maestro",
    about = "Multi-agent orchestration core",
    version,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Explicit config file (otherwise searched in standard locations).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Write tracing output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project name for tasks and knowledge.
    #[arg(long, global = true, default_value = "default")]
    pub project: String,

    /// Workspace directory the agent's tools operate in.
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP/SSE bridge for the web client.
    Serve,
    /// Run a single task headless and print the outcome.
    Run {
        /// The task text.
        task: String,
    },
    /// List stored sessions.
    Sessions,
    /// Print the effective configuration.
    ShowConfig,
}
