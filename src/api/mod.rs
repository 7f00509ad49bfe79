// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod embed;
pub mod errors;
pub mod handlers;
pub mod http_server;

pub use embed::{embeddings_handler, EmbeddingRequest, EmbeddingResponse};
pub use errors::{ApiError, ApiErrorResponse, ErrorResponse};
pub use handlers::{health_handler, not_found_handler, EngineInfo, HealthResponse};
pub use http_server::{create_app, start_server, AppState, ServerConfig};
