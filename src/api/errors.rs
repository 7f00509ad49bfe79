// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::embeddings::{InputFailure, ProcessError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    NotFound(String),
    InvalidRequest(String),
    ValidationError {
        field: String,
        message: String,
    },
    /// The engine could not be brought up (provisioning or model load).
    ServiceUnavailable {
        kind: String,
        message: String,
    },
    /// The engine was up but the inputs could not be embedded.
    EmbeddingFailed {
        kind: String,
        message: String,
        failures: Vec<InputFailure>,
    },
    Timeout,
}

impl ApiError {
    pub fn to_response(&self, request_id: Option<String>) -> ErrorResponse {
        let (error_type, message, details) = match self {
            ApiError::NotFound(msg) => ("not_found".to_string(), msg.clone(), None),
            ApiError::InvalidRequest(msg) => ("invalid_request".to_string(), msg.clone(), None),
            ApiError::ValidationError { field, message } => {
                let mut details = HashMap::new();
                details.insert(
                    "field".to_string(),
                    serde_json::Value::String(field.clone()),
                );
                ("validation_error".to_string(), message.clone(), Some(details))
            }
            ApiError::ServiceUnavailable { kind, message } => (kind.clone(), message.clone(), None),
            ApiError::EmbeddingFailed {
                kind,
                message,
                failures,
            } => {
                let details = if failures.is_empty() {
                    None
                } else {
                    let mut details = HashMap::new();
                    details.insert(
                        "errors".to_string(),
                        serde_json::Value::Array(
                            failures
                                .iter()
                                .map(|f| {
                                    serde_json::json!({
                                        "index": f.index,
                                        "type": f.error.kind(),
                                        "message": f.error.to_string(),
                                    })
                                })
                                .collect(),
                        ),
                    );
                    Some(details)
                };
                (kind.clone(), message.clone(), details)
            }
            ApiError::Timeout => ("timeout".to_string(), "Request timed out".to_string(), None),
        };

        ErrorResponse {
            error_type,
            message,
            request_id,
            details,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::InvalidRequest(_) | ApiError::ValidationError { .. } => 400,
            ApiError::ServiceUnavailable { .. } => 503,
            ApiError::EmbeddingFailed { .. } => 500,
            ApiError::Timeout => 504,
        }
    }

    /// Attaches a request id so the body can be correlated with logs.
    pub fn with_request_id(self, request_id: impl Into<String>) -> ApiErrorResponse {
        ApiErrorResponse {
            error: self,
            request_id: Some(request_id.into()),
        }
    }
}

impl From<ProcessError> for ApiError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Validation(e) => ApiError::ValidationError {
                field: e.field(),
                message: e.to_string(),
            },
            ProcessError::Unavailable(e) => ApiError::ServiceUnavailable {
                kind: e.kind().to_string(),
                message: format!("Embedding engine unavailable: {}", e),
            },
            ProcessError::Engine(e) => ApiError::EmbeddingFailed {
                kind: e.kind().to_string(),
                message: e.to_string(),
                failures: Vec::new(),
            },
            ProcessError::AllInputsFailed { failures } => ApiError::EmbeddingFailed {
                kind: "embedding_failed".to_string(),
                message: format!("None of the {} inputs could be embedded", failures.len()),
                failures,
            },
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::ValidationError { field, message } => {
                write!(f, "Validation error for {}: {}", field, message)
            }
            ApiError::ServiceUnavailable { message, .. } => {
                write!(f, "Service unavailable: {}", message)
            }
            ApiError::EmbeddingFailed { message, .. } => write!(f, "Embedding failed: {}", message),
            ApiError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for ApiError {}

/// `ApiError` paired with the request id it is reported under.
#[derive(Debug)]
pub struct ApiErrorResponse {
    pub error: ApiError,
    pub request_id: Option<String>,
}

impl From<ApiError> for ApiErrorResponse {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            request_id: None,
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.error.to_response(self.request_id);

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ApiErrorResponse::from(self).into_response()
    }
}
