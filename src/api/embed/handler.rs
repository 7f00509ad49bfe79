// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! `POST /v1/embeddings` HTTP handler.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use super::{assemble, EmbeddingRequest, EmbeddingResponse};
use crate::api::errors::{ApiError, ApiErrorResponse};
use crate::api::http_server::AppState;

/// Embeds the request's inputs with the configured model.
///
/// Malformed bodies and blank inputs are rejected with 400 before the engine
/// is touched. A first request against a cold cache provisions and loads the
/// model; if that fails the response is 503 and the next request retries.
/// Requests running past the configured timeout get a 504; any model load
/// they started keeps going in the background.
pub async fn embeddings_handler(
    State(state): State<AppState>,
    payload: Result<Json<EmbeddingRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>, ApiErrorResponse> {
    let request_id = Uuid::new_v4().to_string();

    let Json(request) = payload.map_err(|rejection| {
        warn!(request_id = %request_id, "Rejected malformed embedding request: {}", rejection);
        ApiError::InvalidRequest(rejection.body_text()).with_request_id(request_id.clone())
    })?;

    let span = info_span!("embeddings", request_id = %request_id);
    async move {
        let normalize = request.normalize;
        let processing = state.processor.process(request.into_job());
        let outcome = match tokio::time::timeout(state.request_timeout, processing).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(error = %e, "Embedding request failed");
                return Err(ApiError::from(e).with_request_id(request_id));
            }
            Err(_) => {
                warn!(
                    timeout_ms = state.request_timeout.as_millis() as u64,
                    "Embedding request timed out"
                );
                return Err(ApiError::Timeout.with_request_id(request_id));
            }
        };

        let model_label = state.processor.manager().spec().model_label();
        let response = assemble(outcome.records, outcome.usage, normalize, &model_label)
            .with_failures(&outcome.failures);

        Ok(Json(response))
    }
    .instrument(span)
    .await
}
