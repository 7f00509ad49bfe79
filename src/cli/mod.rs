// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod fetch;
pub mod probe;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Radiant Embed Node CLI
#[derive(Parser, Debug)]
#[command(name = "radiant-cli")]
#[command(version)]
#[command(about = "Operator tools for the Radiant embedding server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Measure embedding latency against a running server
    Probe(probe::ProbeArgs),

    /// Download the configured model into the local cache
    Fetch(fetch::FetchArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Probe(args) => probe::run_probe(args).await,
        Commands::Fetch(args) => fetch::run_fetch(args).await,
    }
}
