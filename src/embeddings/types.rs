// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Core data types for the embedding pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::{EngineError, InitError};

/// Request input as clients send it: a bare string or a list of strings.
///
/// Collapsed into a `Vec<String>` at the boundary; nothing downstream looks
/// at the original shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Many(Vec<String>),
}

impl EmbeddingInput {
    pub fn into_texts(self) -> Vec<String> {
        match self {
            EmbeddingInput::Single(text) => vec![text],
            EmbeddingInput::Many(texts) => texts,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EmbeddingInput::Single(_) => 1,
            EmbeddingInput::Many(texts) => texts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for EmbeddingInput {
    fn from(text: &str) -> Self {
        EmbeddingInput::Single(text.to_string())
    }
}

impl From<Vec<String>> for EmbeddingInput {
    fn from(texts: Vec<String>) -> Self {
        EmbeddingInput::Many(texts)
    }
}

/// A unit of work for the processor, already in canonical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingJob {
    pub texts: Vec<String>,
    /// Caller-requested batch size, capped by the engine maximum.
    pub batch_size: Option<usize>,
}

impl EmbeddingJob {
    pub fn new(texts: Vec<String>) -> Self {
        Self {
            texts,
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// One embedded input. `index` is its position in the original request.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub index: usize,
    pub vector: Vec<f32>,
    pub token_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: usize,
    pub total_tokens: usize,
}

impl UsageStats {
    /// Embedding has no completion side, so total equals prompt.
    pub fn from_records(records: &[EmbeddingRecord]) -> Self {
        let prompt_tokens = records.iter().map(|r| r.token_count).sum();
        Self {
            prompt_tokens,
            total_tokens: prompt_tokens,
        }
    }
}

/// An input that could not be embedded while the rest of the request was.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFailure {
    pub index: usize,
    pub error: EngineError,
}

/// Result of processing one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// Sorted by index.
    pub records: Vec<EmbeddingRecord>,
    pub usage: UsageStats,
    /// Sorted by index.
    pub failures: Vec<InputFailure>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("input must contain at least one string")]
    EmptyInput,
    #[error("input[{index}] is empty or contains only whitespace")]
    BlankInput { index: usize },
    #[error("batch_size must be at least 1")]
    InvalidBatchSize,
}

impl ValidationError {
    /// Request field the error refers to.
    pub fn field(&self) -> String {
        match self {
            ValidationError::EmptyInput => "input".to_string(),
            ValidationError::BlankInput { index } => format!("input[{}]", index),
            ValidationError::InvalidBatchSize => "batch_size".to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Embedding engine unavailable: {0}")]
    Unavailable(#[from] InitError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("None of the {} inputs could be embedded", failures.len())]
    AllInputsFailed { failures: Vec<InputFailure> },
}
