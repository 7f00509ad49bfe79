// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Turns a logical embedding request into engine calls.
//!
//! Inputs are validated up front, split into order-preserving batches, and
//! each batch is packed into engine calls whose combined token length fits
//! the context window. An input that cannot be embedded fails on its own;
//! the rest of the request still completes.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::types::{
    EmbeddingJob, EmbeddingRecord, InputFailure, ProcessError, ProcessOutcome, UsageStats,
    ValidationError,
};
use crate::inference::{EngineError, EngineManager};

/// Rejects empty requests and blank entries. Runs before any engine work.
pub fn validate_inputs(texts: &[String]) -> Result<(), ValidationError> {
    if texts.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    match texts.iter().position(|t| t.trim().is_empty()) {
        Some(index) => Err(ValidationError::BlankInput { index }),
        None => Ok(()),
    }
}

/// Requested batch size capped at `max_batch_size`.
pub fn effective_batch_size(
    requested: Option<usize>,
    max_batch_size: usize,
) -> Result<usize, ValidationError> {
    match requested {
        Some(0) => Err(ValidationError::InvalidBatchSize),
        Some(size) => Ok(size.min(max_batch_size).max(1)),
        None => Ok(max_batch_size.max(1)),
    }
}

/// Greedily groups `(index, tokens)` pairs, in order, so that each group's
/// token total stays within `budget`. A single item larger than the budget
/// gets a group of its own.
pub fn pack_by_tokens(items: &[(usize, usize)], budget: usize) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut used = 0;

    for &(index, tokens) in items {
        if !current.is_empty() && used + tokens > budget {
            groups.push(std::mem::take(&mut current));
            used = 0;
        }
        used += tokens;
        current.push(index);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

#[derive(Clone)]
pub struct EmbeddingProcessor {
    manager: Arc<EngineManager>,
}

impl EmbeddingProcessor {
    pub fn new(manager: Arc<EngineManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<EngineManager> {
        &self.manager
    }

    pub async fn process(&self, job: EmbeddingJob) -> Result<ProcessOutcome, ProcessError> {
        let started = Instant::now();
        let texts = job.texts;
        validate_inputs(&texts)?;
        let batch_size = effective_batch_size(job.batch_size, self.manager.config().max_batch_size)?;

        let engine = self.manager.get_or_create().await?;
        let window = engine.config().context_window;
        let truncate = engine.config().truncate_inputs;

        let mut records: Vec<EmbeddingRecord> = Vec::with_capacity(texts.len());
        let mut failures: Vec<InputFailure> = Vec::new();

        for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            let counts = engine.count_tokens(batch.to_vec()).await?;

            // Pre-truncation counts, reused for usage once an input is embedded.
            let mut token_counts = vec![0; batch.len()];
            let mut admitted = Vec::with_capacity(batch.len());
            for (position, count) in counts.into_iter().enumerate() {
                let index = offset + position;
                if let Ok(tokens) = count {
                    token_counts[position] = tokens;
                }
                match count {
                    Ok(tokens) if tokens > window && !truncate => {
                        failures.push(InputFailure {
                            index,
                            error: EngineError::InputTooLong {
                                tokens,
                                context_window: window,
                            },
                        });
                    }
                    Ok(tokens) => admitted.push((index, tokens.min(window))),
                    Err(error) => failures.push(InputFailure { index, error }),
                }
            }

            for group in pack_by_tokens(&admitted, window) {
                let group_texts: Vec<String> = group.iter().map(|&i| texts[i].clone()).collect();
                let results = engine.embed(group_texts).await?;
                for (&index, result) in group.iter().zip(results) {
                    match result {
                        Ok(vector) => records.push(EmbeddingRecord {
                            index,
                            vector,
                            token_count: token_counts[index - offset],
                        }),
                        Err(error) => failures.push(InputFailure { index, error }),
                    }
                }
            }

            debug!(batch = batch_no, inputs = batch.len(), "Batch processed");
        }

        records.sort_by_key(|r| r.index);
        failures.sort_by_key(|f| f.index);

        for failure in &failures {
            warn!(index = failure.index, error = %failure.error, "Input could not be embedded");
        }

        if records.is_empty() {
            return Err(ProcessError::AllInputsFailed { failures });
        }

        let usage = UsageStats::from_records(&records);
        info!(
            inputs = texts.len(),
            embedded = records.len(),
            failed = failures.len(),
            tokens = usage.total_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Embedding request processed"
        );

        Ok(ProcessOutcome {
            records,
            usage,
            failures,
        })
    }

    /// Loads the engine and embeds a throwaway input.
    pub async fn warmup(&self) -> Result<(), ProcessError> {
        self.process(EmbeddingJob::new(vec!["warmup".to_string()]))
            .await
            .map(|_| ())
    }
}
