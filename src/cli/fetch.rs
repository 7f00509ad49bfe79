// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::config::ModelSettings;
use crate::models::{HttpArtifactFetcher, ModelProvisioner};
use std::sync::Arc;

/// Arguments for the fetch command
#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub model: ModelSettings,

    /// Hide the download progress bar
    #[arg(long)]
    pub quiet: bool,
}

/// Downloads the configured model into the cache so a deployment starts warm.
pub async fn run_fetch(args: FetchArgs) -> Result<()> {
    let spec = args.model.to_spec()?;
    let fetcher = HttpArtifactFetcher::new()?.with_progress(!args.quiet);
    let provisioner = ModelProvisioner::new(Arc::new(fetcher));

    let path = provisioner.ensure(&spec).await?;
    let stats = provisioner.stats();

    if stats.cache_hits > 0 {
        info!(model = %spec.model_label(), "Model already cached");
    } else {
        info!(model = %spec.model_label(), "Model downloaded");
    }
    println!("{}", path.display());
    Ok(())
}
