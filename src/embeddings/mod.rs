// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Embedding request processing.

pub mod processor;
pub mod types;

pub use processor::{effective_batch_size, pack_by_tokens, validate_inputs, EmbeddingProcessor};
pub use types::{
    EmbeddingInput, EmbeddingJob, EmbeddingRecord, InputFailure, ProcessError, ProcessOutcome,
    UsageStats, ValidationError,
};
