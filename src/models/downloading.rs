// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model provisioning: makes sure the GGUF weights named by a [`ModelSpec`]
//! exist in the local cache, downloading them once when they do not.
//!
//! Downloads land in a temporary file inside the cache directory and are
//! renamed into place only after the body has been fully written and synced,
//! so the canonical path never exposes a partial artifact.

use async_trait::async_trait;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";

/// Identifies which weight artifact to use and where to cache it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub repository_id: String,
    pub file_name: String,
    pub cache_dir: PathBuf,
    pub revision: String,
    pub endpoint: String,
    pub auth_token: Option<String>,
}

impl ModelSpec {
    pub fn new(
        repository_id: impl Into<String>,
        file_name: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repository_id: repository_id.into(),
            file_name: file_name.into(),
            cache_dir: cache_dir.into(),
            revision: DEFAULT_REVISION.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            auth_token: None,
        }
    }

    /// Canonical on-disk location of the artifact.
    pub fn local_path(&self) -> PathBuf {
        self.cache_dir.join(&self.file_name)
    }

    /// Label reported in embedding responses (`repository_id:file_name`).
    pub fn model_label(&self) -> String {
        format!("{}:{}", self.repository_id, self.file_name)
    }

    /// Remote URL of the artifact in a Hugging Face compatible repository.
    pub fn download_url(&self) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.repository_id,
            self.revision,
            self.file_name
        )
    }
}

/// Messages deliberately omit filesystem paths; paths go to the logs only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisionError {
    #[error("Model artifact '{file_name}' not found in repository '{repository_id}'")]
    ArtifactNotFound {
        repository_id: String,
        file_name: String,
    },
    #[error("Access to repository '{repository_id}' was denied")]
    Unauthorized { repository_id: String },
    #[error("Artifact repository responded with HTTP {status}")]
    RemoteStatus { status: u16 },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Model cache directory is not writable: {0}")]
    CacheUnwritable(String),
    #[error("Download interrupted: {0}")]
    Interrupted(String),
    #[error("Downloaded artifact '{file_name}' is empty")]
    EmptyArtifact { file_name: String },
}

impl ProvisionError {
    /// Stable machine-readable kind used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::ArtifactNotFound { .. } => "artifact_not_found",
            ProvisionError::Unauthorized { .. } => "artifact_unauthorized",
            ProvisionError::RemoteStatus { .. } | ProvisionError::Network(_) => {
                "artifact_unavailable"
            }
            ProvisionError::CacheUnwritable(_) => "cache_unwritable",
            ProvisionError::Interrupted(_) | ProvisionError::EmptyArtifact { .. } => {
                "download_interrupted"
            }
        }
    }
}

/// Transfers one remote artifact into `dest`, returning the bytes written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, spec: &ModelSpec, dest: &Path) -> Result<u64, ProvisionError>;
}

/// Streams artifacts over HTTP from a Hugging Face compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
    show_progress: bool,
}

impl HttpArtifactFetcher {
    pub fn new() -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("radiant-embed-node/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::Network(e.to_string()))?;

        Ok(Self {
            client,
            show_progress: true,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        match total {
            Some(len) => {
                let bar = ProgressBar::new(len);
                if let Ok(style) = ProgressStyle::with_template(
                    "{msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                ) {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar
            }
            None => ProgressBar::new_spinner(),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, spec: &ModelSpec, dest: &Path) -> Result<u64, ProvisionError> {
        let url = spec.download_url();
        url::Url::parse(&url).map_err(|e| ProvisionError::Network(e.to_string()))?;

        let mut request = self.client.get(&url);
        if let Some(token) = &spec.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProvisionError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProvisionError::ArtifactNotFound {
                repository_id: spec.repository_id.clone(),
                file_name: spec.file_name.clone(),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProvisionError::Unauthorized {
                repository_id: spec.repository_id.clone(),
            });
        }
        if !status.is_success() {
            return Err(ProvisionError::RemoteStatus {
                status: status.as_u16(),
            });
        }

        let bar = self.progress_bar(response.content_length());
        bar.set_message(spec.file_name.clone());

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(dest)
            .await
            .map_err(|e| ProvisionError::CacheUnwritable(e.kind().to_string()))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProvisionError::Interrupted(e.without_url().to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ProvisionError::Interrupted(e.kind().to_string()))?;
            written += chunk.len() as u64;
            bar.set_position(written);
        }

        file.flush()
            .await
            .map_err(|e| ProvisionError::Interrupted(e.kind().to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| ProvisionError::Interrupted(e.kind().to_string()))?;
        bar.finish_and_clear();

        Ok(written)
    }
}

/// Counters exposed for health reporting and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProvisionStats {
    pub downloads: usize,
    pub cache_hits: usize,
}

/// Ensures model weights are present in the local cache.
pub struct ModelProvisioner {
    fetcher: Arc<dyn ArtifactFetcher>,
    downloads: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl ModelProvisioner {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            fetcher,
            downloads: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        }
    }

    /// Provisioner backed by [`HttpArtifactFetcher`].
    pub fn http() -> Result<Self, ProvisionError> {
        Ok(Self::new(Arc::new(HttpArtifactFetcher::new()?)))
    }

    pub fn stats(&self) -> ProvisionStats {
        ProvisionStats {
            downloads: self.downloads.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
        }
    }

    /// Returns the local path of the artifact, downloading it first if the
    /// cached copy is missing or empty.
    pub async fn ensure(&self, spec: &ModelSpec) -> Result<PathBuf, ProvisionError> {
        let final_path = spec.local_path();

        if is_cached(&final_path).await {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            debug!(file = %spec.file_name, "Model artifact found in cache");
            return Ok(final_path);
        }

        tokio::fs::create_dir_all(&spec.cache_dir).await.map_err(|e| {
            warn!(cache_dir = %spec.cache_dir.display(), error = %e, "Failed to create model cache");
            ProvisionError::CacheUnwritable(e.kind().to_string())
        })?;

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", spec.file_name))
            .suffix(".partial")
            .tempfile_in(&spec.cache_dir)
            .map_err(|e| {
                warn!(cache_dir = %spec.cache_dir.display(), error = %e, "Failed to create temporary download file");
                ProvisionError::CacheUnwritable(e.kind().to_string())
            })?;

        info!(
            repository = %spec.repository_id,
            file = %spec.file_name,
            revision = %spec.revision,
            "Downloading model artifact"
        );
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        // The temp file is removed on drop if anything below fails.
        let bytes = self.fetcher.fetch(spec, temp.path()).await?;
        if bytes == 0 {
            return Err(ProvisionError::EmptyArtifact {
                file_name: spec.file_name.clone(),
            });
        }

        temp.persist(&final_path).map_err(|e| {
            warn!(path = %final_path.display(), error = %e.error, "Failed to move download into place");
            ProvisionError::CacheUnwritable(e.error.kind().to_string())
        })?;

        info!(
            file = %spec.file_name,
            bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model artifact downloaded"
        );
        Ok(final_path)
    }
}

async fn is_cached(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}
