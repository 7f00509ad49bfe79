// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// How per-token outputs are reduced to a single vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingStrategy {
    #[default]
    Mean,
    Cls,
    Last,
    /// Whatever the GGUF metadata declares.
    Model,
}

impl FromStr for PoolingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(PoolingStrategy::Mean),
            "cls" => Ok(PoolingStrategy::Cls),
            "last" => Ok(PoolingStrategy::Last),
            "model" | "default" => Ok(PoolingStrategy::Model),
            other => Err(format!(
                "unsupported pooling strategy '{}' (expected mean, cls, last or model)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub context_window: usize,
    pub thread_count: usize,
    pub max_batch_size: usize,
    pub gpu_layers: u32,
    pub pooling: PoolingStrategy,
    /// Cut over-long inputs to the context window instead of rejecting them.
    pub truncate_inputs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_window: 8192,
            thread_count: 4,
            max_batch_size: 32,
            gpu_layers: 0,
            pooling: PoolingStrategy::Mean,
            truncate_inputs: false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Input is {tokens} tokens long, exceeding the context window of {context_window}")]
    InputTooLong { tokens: usize, context_window: usize },
    #[error("Tokenization failed: {0}")]
    Tokenization(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    #[error("Inference worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    /// Stable machine-readable kind used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InputTooLong { .. } => "input_too_long",
            EngineError::Tokenization(_) => "tokenization_error",
            EngineError::Inference(_) => "inference_error",
            EngineError::ModelLoad(_) => "model_load_error",
            EngineError::Worker(_) => "engine_error",
        }
    }
}

/// An in-process embedding model.
///
/// Implementations are not assumed to be reentrant: [`EngineHandle`] holds a
/// single lock around the backend and every call goes through it.
pub trait EmbeddingBackend: Send {
    /// Length of every vector returned by [`EmbeddingBackend::embed`].
    fn dimension(&self) -> usize;

    /// Token length of `text` as the model sees it, before any truncation.
    fn count_tokens(&mut self, text: &str) -> Result<usize, EngineError>;

    /// Embeds `texts` in one pass. The result has one entry per input, in
    /// order; a failure for one input must not fail its neighbours.
    fn embed(&mut self, texts: &[String]) -> Vec<Result<Vec<f32>, EngineError>>;
}

/// Builds the backend once the model file is available locally.
pub trait BackendFactory: Send + Sync {
    fn load(
        &self,
        model_path: &Path,
        config: &EngineConfig,
    ) -> Result<Box<dyn EmbeddingBackend>, EngineError>;
}

/// Shared handle to the single loaded model.
#[derive(Clone)]
pub struct EngineHandle {
    backend: Arc<Mutex<Box<dyn EmbeddingBackend>>>,
    config: EngineConfig,
    model_path: PathBuf,
    dimension: usize,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("model_path", &self.model_path)
            .field("dimension", &self.dimension)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    pub fn new(backend: Box<dyn EmbeddingBackend>, config: EngineConfig, model_path: PathBuf) -> Self {
        let dimension = backend.dimension();
        Self {
            backend: Arc::new(Mutex::new(backend)),
            config,
            model_path,
            dimension,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Runs `f` against the backend on the blocking pool, holding the global
    /// inference lock for its duration.
    async fn with_backend<F, R>(&self, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(&mut dyn EmbeddingBackend) -> R + Send + 'static,
        R: Send + 'static,
    {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            // A panic inside a previous call poisons the lock but leaves the
            // model itself intact, so keep serving.
            let mut guard = backend.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut **guard)
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))
    }

    /// Token counts for each input, prior to truncation.
    pub async fn count_tokens(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Result<usize, EngineError>>, EngineError> {
        self.with_backend(move |backend| {
            texts
                .iter()
                .map(|text| backend.count_tokens(text))
                .collect::<Vec<_>>()
        })
        .await
    }

    /// Embeds `texts` in one engine call. The caller keeps the combined token
    /// length within the context window and already holds the token counts
    /// from [`EngineHandle::count_tokens`].
    pub async fn embed(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Result<Vec<f32>, EngineError>>, EngineError> {
        let started = Instant::now();
        let count = texts.len();
        let results = self
            .with_backend(move |backend| backend.embed(&texts))
            .await?;

        if results.len() != count {
            return Err(EngineError::Worker(format!(
                "backend returned {} results for {} inputs",
                results.len(),
                count
            )));
        }

        debug!(
            inputs = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Engine call complete"
        );
        Ok(results)
    }
}
