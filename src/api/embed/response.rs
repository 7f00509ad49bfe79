// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Response envelope for `POST /v1/embeddings` and the assembler that
//! builds it from processed records.

use serde::{Deserialize, Serialize};

use crate::embeddings::{EmbeddingRecord, InputFailure, UsageStats};

/// One embedding in the `data` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingData {
    /// Always "embedding"
    pub object: String,
    /// Position of the input in the request
    pub index: usize,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub total_tokens: usize,
}

impl From<UsageStats> for Usage {
    fn from(stats: UsageStats) -> Self {
        Self {
            prompt_tokens: stats.prompt_tokens,
            total_tokens: stats.total_tokens,
        }
    }
}

/// An input the server could not embed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingFailure {
    pub index: usize,
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl From<&InputFailure> for EmbeddingFailure {
    fn from(failure: &InputFailure) -> Self {
        Self {
            index: failure.index,
            error_type: failure.error.kind().to_string(),
            message: failure.error.to_string(),
        }
    }
}

/// Response body for `POST /v1/embeddings`
///
/// # Example
/// ```json
/// {
///   "object": "list",
///   "model": "nomic-ai/nomic-embed-text-v1.5-GGUF:nomic-embed-text-v1.5.Q4_K_M.gguf",
///   "data": [
///     { "object": "embedding", "index": 0, "embedding": [0.01, -0.03, ...] }
///   ],
///   "usage": { "prompt_tokens": 3, "total_tokens": 3 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// Always "list"
    pub object: String,
    /// `repository_id:file_name`
    pub model: String,
    pub data: Vec<EmbeddingData>,
    pub usage: Usage,
    /// Inputs that failed while the rest succeeded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EmbeddingFailure>,
}

impl EmbeddingResponse {
    /// Adds per-input failures (builder pattern)
    pub fn with_failures(mut self, failures: &[InputFailure]) -> Self {
        self.errors = failures.iter().map(EmbeddingFailure::from).collect();
        self
    }

    pub fn dimension(&self) -> Option<usize> {
        self.data.first().map(|d| d.embedding.len())
    }
}

/// Rescales `vector` to unit L2 norm in place. All-zero vectors are left
/// unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Builds the response envelope. Records keep the order they are given in,
/// which the processor guarantees is input order.
pub fn assemble(
    records: Vec<EmbeddingRecord>,
    usage: UsageStats,
    normalize: bool,
    model_label: &str,
) -> EmbeddingResponse {
    let data = records
        .into_iter()
        .map(|record| {
            let mut embedding = record.vector;
            if normalize {
                l2_normalize(&mut embedding);
            }
            EmbeddingData {
                object: "embedding".to_string(),
                index: record.index,
                embedding,
            }
        })
        .collect();

    EmbeddingResponse {
        object: "list".to_string(),
        model: model_label.to_string(),
        data,
        usage: usage.into(),
        errors: Vec::new(),
    }
}
