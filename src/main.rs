// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use clap::Parser;
use radiant_embed_node::{
    api::{start_server, AppState},
    config::Settings,
    embeddings::EmbeddingProcessor,
    inference::{EngineManager, LlamaBackendFactory},
    models::ModelProvisioner,
    version,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// OpenAI-compatible embedding server for local GGUF models
#[derive(Parser, Debug)]
#[command(name = "radiant-embed-node", version, long_about = None)]
struct ServerArgs {
    #[command(flatten)]
    settings: Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be read before clap resolves env fallbacks
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = ServerArgs::parse().settings;
    let (spec, engine_config) = settings.validate()?;
    let server_config = settings.server_config()?;

    tracing::info!(features = ?version::FEATURES, "{}", version::get_version_string());
    tracing::info!(
        model = %spec.model_label(),
        cache_dir = %spec.cache_dir.display(),
        threads = engine_config.thread_count,
        context_window = engine_config.context_window,
        max_batch_size = engine_config.max_batch_size,
        gpu_layers = engine_config.gpu_layers,
        "Configuration loaded"
    );

    let provisioner = Arc::new(ModelProvisioner::http()?);
    let manager = Arc::new(EngineManager::new(
        spec,
        engine_config,
        provisioner,
        Arc::new(LlamaBackendFactory),
    ));
    let processor = EmbeddingProcessor::new(manager);

    if settings.warmup_on_start {
        let warmup = processor.clone();
        tokio::spawn(async move {
            match warmup.warmup().await {
                Ok(()) => tracing::info!("Warmup embedding complete"),
                Err(e) => tracing::warn!(
                    error = %e,
                    "Warmup failed; the model will be loaded on the first request"
                ),
            }
        });
    }

    start_server(server_config, AppState::new(processor)).await
}
