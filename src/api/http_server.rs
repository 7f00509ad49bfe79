// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::{net::SocketAddr, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::embed::embeddings_handler;
use super::handlers::{health_handler, not_found_handler};
use crate::embeddings::EmbeddingProcessor;

#[derive(Clone)]
pub struct AppState {
    pub processor: EmbeddingProcessor,
    pub started_at: DateTime<Utc>,
    /// Upper bound on one embedding request, reported as a 504 when hit.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(processor: EmbeddingProcessor) -> Self {
        Self {
            processor,
            started_at: Utc::now(),
            request_timeout: ServerConfig::default().request_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout: Duration::from_secs(60),
        }
    }
}

pub fn create_app(state: AppState, request_timeout: Duration) -> Router {
    let state = AppState {
        request_timeout,
        ..state
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/embeddings", post(embeddings_handler))
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn start_server(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = create_app(state, config.request_timeout);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Embedding server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Embedding server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
