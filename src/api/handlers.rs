// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{extract::State, http::Uri, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{ApiError, ApiErrorResponse};
use super::http_server::AppState;
use crate::inference::LifecycleState;
use crate::version;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Configured model file name
    pub model: String,
    pub engine: EngineInfo,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

/// `GET /health`. Reports state only; never triggers engine creation.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let manager = state.processor.manager();
    let engine = manager.status().await;

    // A failed load is retried on the next request, so the process is still
    // serving; report it as degraded rather than down.
    let status = match engine.state {
        LifecycleState::Failed => "degraded",
        _ => "ok",
    };

    Json(HealthResponse {
        status: status.to_string(),
        model: manager.spec().file_name.clone(),
        engine: EngineInfo {
            state: engine.state,
            dimension: engine.dimension,
            last_error: engine.last_error,
        },
        version: version::VERSION.to_string(),
        started_at: state.started_at,
    })
}

/// Fallback for unknown routes.
pub async fn not_found_handler(uri: Uri) -> ApiErrorResponse {
    ApiError::NotFound(format!("No route for {}", uri.path()))
        .with_request_id(Uuid::new_v4().to_string())
}
