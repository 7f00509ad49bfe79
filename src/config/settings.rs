// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::api::ServerConfig;
use crate::inference::{EngineConfig, PoolingStrategy};
use crate::models::{ModelSpec, DEFAULT_ENDPOINT, DEFAULT_REVISION};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be greater than 0")]
    ZeroValue { name: &'static str },
    #[error("{name} must not be empty")]
    Blank { name: &'static str },
    #[error("MODEL_FILE must be a bare file name, got '{0}'")]
    InvalidFileName(String),
    #[error("invalid POOLING_STRATEGY: {0}")]
    InvalidPooling(String),
}

/// Which model to serve and where to get it.
#[derive(Args, Debug, Clone)]
pub struct ModelSettings {
    /// Repository that hosts the GGUF artifact
    #[arg(long, env = "MODEL_REPO_ID", default_value = "nomic-ai/nomic-embed-text-v1.5-GGUF")]
    pub model_repo_id: String,

    /// GGUF file inside the repository
    #[arg(long, env = "MODEL_FILE", default_value = "nomic-embed-text-v1.5.Q4_K_M.gguf")]
    pub model_file: String,

    /// Repository revision (branch, tag or commit)
    #[arg(long, env = "MODEL_REVISION", default_value = DEFAULT_REVISION)]
    pub model_revision: String,

    /// Local cache directory for downloaded weights
    #[arg(long, env = "MODEL_CACHE_DIR", default_value = ".models")]
    pub model_cache_dir: PathBuf,

    /// Artifact repository base URL
    #[arg(long, env = "HF_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub hf_endpoint: String,

    /// Bearer token for gated repositories
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,
}

impl ModelSettings {
    pub fn to_spec(&self) -> Result<ModelSpec, ConfigError> {
        if self.model_repo_id.trim().is_empty() {
            return Err(ConfigError::Blank {
                name: "MODEL_REPO_ID",
            });
        }
        let file = self.model_file.trim();
        if file.is_empty() {
            return Err(ConfigError::Blank { name: "MODEL_FILE" });
        }
        if file.contains('/') || file.contains('\\') || file == "." || file == ".." {
            return Err(ConfigError::InvalidFileName(file.to_string()));
        }
        if self.model_revision.trim().is_empty() {
            return Err(ConfigError::Blank {
                name: "MODEL_REVISION",
            });
        }

        let mut spec = ModelSpec::new(
            self.model_repo_id.trim(),
            file,
            self.model_cache_dir.clone(),
        );
        spec.revision = self.model_revision.trim().to_string();
        spec.endpoint = self.hf_endpoint.trim().to_string();
        spec.auth_token = self.hf_token.clone().filter(|t| !t.trim().is_empty());
        Ok(spec)
    }
}

/// Process configuration, read from flags with environment fallbacks.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    #[command(flatten)]
    pub model: ModelSettings,

    /// Inference threads
    #[arg(long, env = "THREADS", default_value_t = 4)]
    pub threads: usize,

    /// Upper bound on inputs per engine batch
    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = 32)]
    pub max_batch_size: usize,

    /// Context window in tokens
    #[arg(long, env = "CONTEXT_WINDOW", default_value_t = 8192)]
    pub context_window: usize,

    /// Layers to offload to the GPU
    #[arg(long, env = "GPU_LAYERS", default_value_t = 0)]
    pub gpu_layers: u32,

    /// mean, cls, last or model
    #[arg(long, env = "POOLING_STRATEGY", default_value = "mean")]
    pub pooling_strategy: String,

    /// Cut over-long inputs to the context window instead of rejecting them
    #[arg(long, env = "TRUNCATE_INPUTS", default_value_t = false, action = clap::ArgAction::Set)]
    pub truncate_inputs: bool,

    /// HTTP request timeout in seconds
    #[arg(long, env = "SERVER_TIMEOUT", default_value_t = 60)]
    pub server_timeout: u64,

    /// Load the model and run one embedding at startup
    #[arg(long, env = "WARMUP_ON_START", default_value_t = true, action = clap::ArgAction::Set)]
    pub warmup_on_start: bool,
}

impl Settings {
    /// Checks the settings and splits them into what the core consumes.
    pub fn validate(&self) -> Result<(ModelSpec, EngineConfig), ConfigError> {
        let spec = self.model.to_spec()?;

        for (name, value) in [
            ("THREADS", self.threads),
            ("MAX_BATCH_SIZE", self.max_batch_size),
            ("CONTEXT_WINDOW", self.context_window),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue { name });
            }
        }

        let pooling: PoolingStrategy = self
            .pooling_strategy
            .parse()
            .map_err(ConfigError::InvalidPooling)?;

        let config = EngineConfig {
            context_window: self.context_window,
            thread_count: self.threads,
            max_batch_size: self.max_batch_size,
            gpu_layers: self.gpu_layers,
            pooling,
            truncate_inputs: self.truncate_inputs,
        };

        Ok((spec, config))
    }

    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Blank { name: "HOST" });
        }
        if self.server_timeout == 0 {
            return Err(ConfigError::ZeroValue {
                name: "SERVER_TIMEOUT",
            });
        }
        Ok(ServerConfig {
            host: self.host.trim().to_string(),
            port: self.port,
            request_timeout: Duration::from_secs(self.server_timeout),
        })
    }
}
