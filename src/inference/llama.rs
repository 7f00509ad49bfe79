// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! llama.cpp embedding backend for GGUF models.
//!
//! `LlamaContext` borrows the model and is `!Send`, so the model and one
//! reusable context live on a dedicated inference thread for the lifetime of
//! the embedder. [`LlamaEmbedder`] forwards each call to that thread and
//! blocks on the reply.

use llama_cpp_2::{
    context::params::{LlamaContextParams, LlamaPoolingType},
    context::LlamaContext,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{params::LlamaModelParams, AddBos, LlamaModel},
    token::LlamaToken,
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::engine::{BackendFactory, EmbeddingBackend, EngineConfig, EngineError, PoolingStrategy};

// llama.cpp may only be initialized once per process.
static BACKEND: OnceLock<LlamaBackend> = OnceLock::new();

/// Tokenizations kept between a count and the embed that follows it.
const TOKEN_CACHE_LIMIT: usize = 1024;
const JOB_QUEUE_DEPTH: usize = 16;

fn llama_backend() -> Result<&'static LlamaBackend, EngineError> {
    if let Some(backend) = BACKEND.get() {
        return Ok(backend);
    }
    let backend = LlamaBackend::init()
        .map_err(|e| EngineError::ModelLoad(format!("Failed to initialize backend: {:?}", e)))?;
    Ok(BACKEND.get_or_init(|| backend))
}

/// Sanitize text for tokenization
///
/// Removes characters that cause issues with C string handling in llama.cpp:
/// - Null bytes (\0), which terminate C strings
/// - Other C0 control characters except tab, newline and carriage return
fn sanitize_for_tokenizer(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\0' && (*c >= ' ' || *c == '\t' || *c == '\n' || *c == '\r'))
        .collect()
}

impl From<PoolingStrategy> for LlamaPoolingType {
    fn from(strategy: PoolingStrategy) -> Self {
        match strategy {
            PoolingStrategy::Mean => LlamaPoolingType::Mean,
            PoolingStrategy::Cls => LlamaPoolingType::Cls,
            PoolingStrategy::Last => LlamaPoolingType::Last,
            PoolingStrategy::Model => LlamaPoolingType::Unspecified,
        }
    }
}

/// Splits prepared inputs, in order, into groups that fit one decode: the
/// combined token length stays within `window` and no group holds more than
/// `max_sequences` inputs.
fn token_groups<T>(
    prepared: Vec<(usize, Vec<T>)>,
    window: usize,
    max_sequences: usize,
) -> Vec<Vec<(usize, Vec<T>)>> {
    let mut groups = Vec::new();
    let mut current: Vec<(usize, Vec<T>)> = Vec::new();
    let mut used = 0;

    for item in prepared {
        let full = current.len() >= max_sequences.max(1);
        if !current.is_empty() && (full || used + item.1.len() > window) {
            groups.push(std::mem::take(&mut current));
            used = 0;
        }
        used += item.1.len();
        current.push(item);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Tokenizations produced while counting, handed to the embed call that
/// follows so each input is tokenized once.
struct TokenCache<T> {
    entries: HashMap<String, Vec<T>>,
    limit: usize,
}

impl<T> TokenCache<T> {
    fn new(limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            limit,
        }
    }

    fn insert(&mut self, text: &str, tokens: Vec<T>) {
        // Counted inputs that never reach embed (oversized, failed requests)
        // would otherwise accumulate.
        if self.entries.len() >= self.limit {
            self.entries.clear();
        }
        self.entries.insert(text.to_string(), tokens);
    }

    fn take(&mut self, text: &str) -> Option<Vec<T>> {
        self.entries.remove(text)
    }
}

enum Job {
    CountTokens {
        text: String,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Embed {
        texts: Vec<String>,
        reply: oneshot::Sender<Vec<Result<Vec<f32>, EngineError>>>,
    },
}

/// Model and context, owned by the inference thread.
struct Worker<'m> {
    model: &'m LlamaModel,
    context: LlamaContext<'m>,
    config: EngineConfig,
    tokens: TokenCache<LlamaToken>,
}

impl<'m> Worker<'m> {
    fn new(model: &'m LlamaModel, config: EngineConfig) -> Result<Self, EngineError> {
        let n_ctx = u32::try_from(config.context_window)
            .map_err(|_| EngineError::ModelLoad("context window too large".to_string()))?;
        let threads = i32::try_from(config.thread_count).unwrap_or(i32::MAX);
        let n_seq = u32::try_from(config.max_batch_size.max(1)).unwrap_or(u32::MAX);

        // Pooled embeddings need the whole sequence in one physical batch.
        let params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(n_ctx)
            .with_n_ubatch(n_ctx)
            .with_n_seq_max(n_seq)
            .with_n_threads(threads)
            .with_n_threads_batch(threads)
            .with_embeddings(true)
            .with_pooling_type(config.pooling.into());

        let context = model
            .new_context(llama_backend()?, params)
            .map_err(|e| EngineError::ModelLoad(format!("Failed to create context: {:?}", e)))?;

        Ok(Self {
            model,
            context,
            config,
            tokens: TokenCache::new(TOKEN_CACHE_LIMIT),
        })
    }

    fn tokenize(&self, text: &str) -> Result<Vec<LlamaToken>, EngineError> {
        let sanitized = sanitize_for_tokenizer(text);
        self.model
            .str_to_token(&sanitized, AddBos::Always)
            .map_err(|e| EngineError::Tokenization(format!("{:?}", e)))
    }

    fn count_tokens(&mut self, text: &str) -> Result<usize, EngineError> {
        let tokens = self.tokenize(text)?;
        let count = tokens.len();
        self.tokens.insert(text, tokens);
        Ok(count)
    }

    /// Decodes all sequences of `group` in a single forward pass.
    fn decode_group(&mut self, group: &[(usize, Vec<LlamaToken>)]) -> Result<Vec<Vec<f32>>, EngineError> {
        let total_tokens: usize = group.iter().map(|(_, tokens)| tokens.len()).sum();
        let mut batch = LlamaBatch::new(total_tokens.max(1), group.len() as i32);

        for (seq_id, (_, tokens)) in group.iter().enumerate() {
            batch
                .add_sequence(tokens, seq_id as i32, false)
                .map_err(|e| EngineError::Inference(format!("Failed to add sequence: {:?}", e)))?;
        }

        self.context.clear_kv_cache();
        self.context
            .decode(&mut batch)
            .map_err(|e| EngineError::Inference(format!("Decode failed: {:?}", e)))?;

        (0..group.len())
            .map(|seq_id| {
                self.context
                    .embeddings_seq_ith(seq_id as i32)
                    .map(|embedding| embedding.to_vec())
                    .map_err(|e| EngineError::Inference(format!("Failed to read embeddings: {:?}", e)))
            })
            .collect()
    }

    fn embed(&mut self, texts: &[String]) -> Vec<Result<Vec<f32>, EngineError>> {
        let window = self.config.context_window;
        let mut results: Vec<Option<Result<Vec<f32>, EngineError>>> = vec![None; texts.len()];
        let mut prepared = Vec::with_capacity(texts.len());

        for (index, text) in texts.iter().enumerate() {
            let tokens = match self.tokens.take(text) {
                Some(tokens) => Ok(tokens),
                None => self.tokenize(text),
            };
            match tokens {
                Ok(mut tokens) if tokens.len() > window => {
                    if self.config.truncate_inputs {
                        tokens.truncate(window);
                        prepared.push((index, tokens));
                    } else {
                        results[index] = Some(Err(EngineError::InputTooLong {
                            tokens: tokens.len(),
                            context_window: window,
                        }));
                    }
                }
                Ok(tokens) => prepared.push((index, tokens)),
                Err(e) => results[index] = Some(Err(e)),
            }
        }

        for group in token_groups(prepared, window, self.config.max_batch_size) {
            match self.decode_group(&group) {
                Ok(vectors) => {
                    for ((index, _), vector) in group.iter().zip(vectors) {
                        results[*index] = Some(Ok(vector));
                    }
                }
                Err(e) if group.len() > 1 => {
                    warn!(
                        sequences = group.len(),
                        error = %e,
                        "Batched decode failed, retrying inputs individually"
                    );
                    for item in group {
                        let index = item.0;
                        results[index] = Some(
                            self.decode_group(std::slice::from_ref(&item))
                                .and_then(|mut vectors| {
                                    vectors.pop().ok_or_else(|| {
                                        EngineError::Inference("no embedding produced".to_string())
                                    })
                                }),
                        );
                    }
                }
                Err(e) => {
                    let index = group[0].0;
                    results[index] = Some(Err(e));
                }
            }
        }

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| {
                    Err(EngineError::Inference("input was not processed".to_string()))
                })
            })
            .collect()
    }
}

fn load_model(model_path: &Path, config: &EngineConfig) -> Result<LlamaModel, EngineError> {
    let backend = llama_backend()?;
    let params = LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers);

    let file_name = model_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    LlamaModel::load_from_file(backend, model_path, &params).map_err(|e| {
        warn!(path = %model_path.display(), error = ?e, "llama.cpp rejected model file");
        EngineError::ModelLoad(format!("'{}' is not a loadable GGUF model", file_name))
    })
}

/// Body of the inference thread. Reports the embedding size (or the load
/// error) on `ready`, then serves jobs until every sender is dropped.
fn run_worker(
    model_path: PathBuf,
    config: EngineConfig,
    ready: oneshot::Sender<Result<usize, EngineError>>,
    mut jobs: mpsc::Receiver<Job>,
) {
    let model = match load_model(&model_path, &config) {
        Ok(model) => model,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let dimension = match usize::try_from(model.n_embd()) {
        Ok(dimension) => dimension,
        Err(_) => {
            let _ = ready.send(Err(EngineError::ModelLoad(
                "model reports a negative embedding size".to_string(),
            )));
            return;
        }
    };
    let mut worker = match Worker::new(&model, config.clone()) {
        Ok(worker) => worker,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    info!(
        dimension,
        context_window = config.context_window,
        max_sequences = config.max_batch_size,
        threads = config.thread_count,
        gpu_layers = config.gpu_layers,
        pooling = ?config.pooling,
        "GGUF embedding model loaded"
    );
    if ready.send(Ok(dimension)).is_err() {
        return;
    }

    while let Some(job) = jobs.blocking_recv() {
        match job {
            Job::CountTokens { text, reply } => {
                let _ = reply.send(worker.count_tokens(&text));
            }
            Job::Embed { texts, reply } => {
                let _ = reply.send(worker.embed(&texts));
            }
        }
    }
    debug!("Inference thread exiting");
}

/// A loaded GGUF embedding model, served by its own inference thread.
///
/// Calls block the current thread until the inference thread replies, so
/// they belong on the blocking pool.
pub struct LlamaEmbedder {
    jobs: mpsc::Sender<Job>,
    dimension: usize,
}

impl LlamaEmbedder {
    pub fn load(model_path: &Path, config: &EngineConfig) -> Result<Self, EngineError> {
        let (jobs, receiver) = mpsc::channel(JOB_QUEUE_DEPTH);
        let (ready, loaded) = oneshot::channel();
        let model_path = model_path.to_path_buf();
        let worker_config = config.clone();

        std::thread::Builder::new()
            .name("llama-embedder".to_string())
            .spawn(move || run_worker(model_path, worker_config, ready, receiver))
            .map_err(|e| EngineError::Worker(format!("failed to start inference thread: {}", e)))?;

        let dimension = loaded
            .blocking_recv()
            .map_err(|_| EngineError::Worker("inference thread exited during load".to_string()))??;

        Ok(Self { jobs, dimension })
    }

    fn call<T>(&self, job: impl FnOnce(oneshot::Sender<T>) -> Job) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .blocking_send(job(reply))
            .map_err(|_| EngineError::Worker("inference thread has stopped".to_string()))?;
        response
            .blocking_recv()
            .map_err(|_| EngineError::Worker("inference thread dropped the request".to_string()))
    }
}

impl EmbeddingBackend for LlamaEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn count_tokens(&mut self, text: &str) -> Result<usize, EngineError> {
        self.call(|reply| Job::CountTokens {
            text: text.to_string(),
            reply,
        })?
    }

    fn embed(&mut self, texts: &[String]) -> Vec<Result<Vec<f32>, EngineError>> {
        let owned = texts.to_vec();
        match self.call(|reply| Job::Embed {
            texts: owned,
            reply,
        }) {
            Ok(results) => results,
            Err(e) => texts.iter().map(|_| Err(e.clone())).collect(),
        }
    }
}

/// Loads [`LlamaEmbedder`] instances for the engine manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct LlamaBackendFactory;

impl BackendFactory for LlamaBackendFactory {
    fn load(
        &self,
        model_path: &Path,
        config: &EngineConfig,
    ) -> Result<Box<dyn EmbeddingBackend>, EngineError> {
        Ok(Box::new(LlamaEmbedder::load(model_path, config)?))
    }
}
