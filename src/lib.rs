// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod cli;
pub mod config;
pub mod embeddings;
pub mod inference;
pub mod models;
pub mod version;

pub use embeddings::{EmbeddingProcessor, ProcessError, ValidationError};
pub use inference::{EngineConfig, EngineError, EngineHandle, EngineManager, InitError};
pub use models::{ModelProvisioner, ModelSpec, ProvisionError};
