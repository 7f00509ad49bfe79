// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Process-wide engine lifecycle.
//!
//! The engine moves `Uninitialized -> Initializing -> Ready`, or lands in
//! `Failed` when provisioning or model loading fails. `Failed` is not
//! terminal: the next request starts a fresh attempt. Initialization runs in
//! its own task; every caller awaits the same shared result, and a caller
//! that gives up does not abandon the work.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::engine::{BackendFactory, EngineConfig, EngineError, EngineHandle};
use crate::models::{ModelProvisioner, ModelSpec, ProvisionError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl InitError {
    pub fn kind(&self) -> &'static str {
        match self {
            InitError::Provision(e) => e.kind(),
            InitError::Engine(e) => e.kind(),
        }
    }
}

type InitResult = Result<Arc<EngineHandle>, InitError>;
type PendingInit = Shared<BoxFuture<'static, InitResult>>;

enum EngineState {
    Uninitialized,
    Initializing(PendingInit),
    Ready(Arc<EngineHandle>),
    Failed { error: InitError, attempts: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Point-in-time view of the engine for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub failed_attempts: usize,
}

/// Everything an initialization task needs, detached from the manager's
/// borrow so the task can be `'static`.
#[derive(Clone)]
struct InitContext {
    spec: ModelSpec,
    config: EngineConfig,
    provisioner: Arc<ModelProvisioner>,
    factory: Arc<dyn BackendFactory>,
    state: Arc<RwLock<EngineState>>,
    constructions: Arc<AtomicUsize>,
}

/// Owns the single engine instance for the process.
pub struct EngineManager {
    ctx: InitContext,
}

impl EngineManager {
    pub fn new(
        spec: ModelSpec,
        config: EngineConfig,
        provisioner: Arc<ModelProvisioner>,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        Self {
            ctx: InitContext {
                spec,
                config,
                provisioner,
                factory,
                state: Arc::new(RwLock::new(EngineState::Uninitialized)),
                constructions: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.ctx.spec
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn provisioner(&self) -> &ModelProvisioner {
        &self.ctx.provisioner
    }

    /// Number of successful backend constructions.
    pub fn constructions(&self) -> usize {
        self.ctx.constructions.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> EngineStatus {
        match &*self.ctx.state.read().await {
            EngineState::Uninitialized => EngineStatus {
                state: LifecycleState::Uninitialized,
                dimension: None,
                last_error: None,
                failed_attempts: 0,
            },
            EngineState::Initializing(_) => EngineStatus {
                state: LifecycleState::Initializing,
                dimension: None,
                last_error: None,
                failed_attempts: 0,
            },
            EngineState::Ready(handle) => EngineStatus {
                state: LifecycleState::Ready,
                dimension: Some(handle.dimension()),
                last_error: None,
                failed_attempts: 0,
            },
            EngineState::Failed { error, attempts } => EngineStatus {
                state: LifecycleState::Failed,
                dimension: None,
                last_error: Some(error.to_string()),
                failed_attempts: *attempts,
            },
        }
    }

    /// Returns the engine, creating it on first use.
    ///
    /// Concurrent callers share one in-flight initialization. Dropping the
    /// returned future only stops waiting; the initialization itself runs to
    /// completion and leaves the engine `Ready` or `Failed`.
    pub async fn get_or_create(&self) -> InitResult {
        if let EngineState::Ready(handle) = &*self.ctx.state.read().await {
            return Ok(handle.clone());
        }

        let mut state = self.ctx.state.write().await;
        let attempts = match &*state {
            EngineState::Ready(handle) => return Ok(handle.clone()),
            EngineState::Initializing(pending) => {
                let pending = pending.clone();
                drop(state);
                return pending.await;
            }
            EngineState::Failed { attempts, .. } => *attempts,
            EngineState::Uninitialized => 0,
        };

        // The task cannot publish its result before this write lock is
        // released, so `Initializing` is always observed first.
        let pending = self.ctx.clone().spawn_init(attempts);
        *state = EngineState::Initializing(pending.clone());
        drop(state);

        pending.await
    }
}

impl InitContext {
    fn spawn_init(self, previous_attempts: usize) -> PendingInit {
        let task = tokio::spawn(self.run(previous_attempts));
        async move {
            task.await.unwrap_or_else(|e| {
                warn!(error = %e, "Engine initialization task aborted");
                Err(InitError::Engine(EngineError::Worker(e.to_string())))
            })
        }
        .boxed()
        .shared()
    }

    async fn run(self, previous_attempts: usize) -> InitResult {
        let started = Instant::now();
        let result = self.initialize().await;

        let mut state = self.state.write().await;
        match &result {
            Ok(handle) => {
                self.constructions.fetch_add(1, Ordering::SeqCst);
                info!(
                    model = %self.spec.model_label(),
                    dimension = handle.dimension(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Embedding engine ready"
                );
                *state = EngineState::Ready(handle.clone());
            }
            Err(e) => {
                error!(
                    model = %self.spec.model_label(),
                    error = %e,
                    attempt = previous_attempts + 1,
                    "Embedding engine initialization failed"
                );
                *state = EngineState::Failed {
                    error: e.clone(),
                    attempts: previous_attempts + 1,
                };
            }
        }
        result
    }

    async fn initialize(&self) -> InitResult {
        let model_path = self.provisioner.ensure(&self.spec).await?;

        let factory = self.factory.clone();
        let config = self.config.clone();
        let load_path = model_path.clone();
        let backend = tokio::task::spawn_blocking(move || factory.load(&load_path, &config))
            .await
            .map_err(|e| {
                warn!(error = %e, "Model loading task panicked");
                EngineError::Worker(e.to_string())
            })??;

        Ok(Arc::new(EngineHandle::new(
            backend,
            self.config.clone(),
            model_path,
        )))
    }
}
