// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod engine;
pub mod llama;
pub mod manager;

pub use engine::{
    BackendFactory, EmbeddingBackend, EngineConfig, EngineError, EngineHandle,
    PoolingStrategy,
};
pub use llama::{LlamaBackendFactory, LlamaEmbedder};
pub use manager::{EngineManager, EngineStatus, InitError, LifecycleState};
