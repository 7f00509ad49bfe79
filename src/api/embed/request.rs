// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Request body for `POST /v1/embeddings`.

use serde::{Deserialize, Serialize};

use crate::embeddings::{EmbeddingInput, EmbeddingJob};

/// OpenAI-compatible embedding request.
///
/// # Example
/// ```json
/// {
///   "input": ["hello world", "goodbye"],
///   "normalize": true,
///   "batch_size": 8
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// A single string or a list of strings
    pub input: EmbeddingInput,

    /// Rescale each vector to unit L2 norm
    #[serde(default = "default_normalize")]
    pub normalize: bool,

    /// Inputs per engine batch; capped by the server maximum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Accepted for client compatibility; the server embeds with its
    /// configured model regardless
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_normalize() -> bool {
    true
}

impl EmbeddingRequest {
    pub fn new(input: impl Into<EmbeddingInput>) -> Self {
        Self {
            input: input.into(),
            normalize: true,
            batch_size: None,
            model: None,
        }
    }

    /// Collapses the request into the processor's canonical job.
    pub fn into_job(self) -> EmbeddingJob {
        EmbeddingJob::new(self.input.into_texts()).with_batch_size(self.batch_size)
    }
}
