// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! HTTP provisioning against an in-process artifact repository.

use radiant_embed_node::models::{HttpArtifactFetcher, ModelProvisioner, ModelSpec, ProvisionError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use crate::common::{spawn_artifact_repo, MODEL_FILE, REPO_ID};

const PAYLOAD: &[u8] = b"GGUF\x03\x00\x00\x00fake-weights";

fn provisioner() -> ModelProvisioner {
    let fetcher = HttpArtifactFetcher::new().unwrap().with_progress(false);
    ModelProvisioner::new(Arc::new(fetcher))
}

fn spec_for(endpoint: &str, cache: &std::path::Path, file: &str) -> ModelSpec {
    let mut spec = ModelSpec::new(REPO_ID, file, cache);
    spec.endpoint = endpoint.to_string();
    spec
}

#[tokio::test]
async fn test_download_then_cache_hit() {
    let repo = spawn_artifact_repo(MODEL_FILE, PAYLOAD.to_vec(), None, Duration::ZERO).await;
    let cache = tempdir().unwrap();
    let nested = cache.path().join("a").join("b");
    let spec = spec_for(&repo.endpoint, &nested, MODEL_FILE);
    let provisioner = provisioner();

    let path = provisioner.ensure(&spec).await.unwrap();
    assert_eq!(path, nested.join(MODEL_FILE));
    assert_eq!(std::fs::read(&path).unwrap(), PAYLOAD);

    let again = provisioner.ensure(&spec).await.unwrap();
    assert_eq!(again, path);

    assert_eq!(repo.downloads(), 1);
    let stats = provisioner.stats();
    assert_eq!(stats.downloads, 1);
    assert_eq!(stats.cache_hits, 1);

    // Only the final artifact remains in the cache directory.
    let entries: Vec<_> = std::fs::read_dir(&nested).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_missing_artifact() {
    let repo = spawn_artifact_repo(MODEL_FILE, PAYLOAD.to_vec(), None, Duration::ZERO).await;
    let cache = tempdir().unwrap();
    let spec = spec_for(&repo.endpoint, cache.path(), "does-not-exist.gguf");

    let err = provisioner().ensure(&spec).await.unwrap_err();

    assert_eq!(
        err,
        ProvisionError::ArtifactNotFound {
            repository_id: REPO_ID.to_string(),
            file_name: "does-not-exist.gguf".to_string(),
        }
    );
    assert_eq!(err.kind(), "artifact_not_found");
    assert!(!spec.local_path().exists());
    assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_gated_repository_requires_token() {
    let repo = spawn_artifact_repo(MODEL_FILE, PAYLOAD.to_vec(), Some("hf_secret"), Duration::ZERO)
        .await;
    let cache = tempdir().unwrap();
    let mut spec = spec_for(&repo.endpoint, cache.path(), MODEL_FILE);

    let err = provisioner().ensure(&spec).await.unwrap_err();
    assert_eq!(err.kind(), "artifact_unauthorized");
    assert!(!spec.local_path().exists());

    spec.auth_token = Some("hf_secret".to_string());
    let path = provisioner().ensure(&spec).await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), PAYLOAD);
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Bind then drop to get a port with nothing listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let cache = tempdir().unwrap();
    let spec = spec_for(&endpoint, cache.path(), MODEL_FILE);

    let err = provisioner().ensure(&spec).await.unwrap_err();
    assert_eq!(err.kind(), "artifact_unavailable");
    assert!(!spec.local_path().exists());
}

#[tokio::test]
async fn test_empty_artifact_is_rejected() {
    let repo = spawn_artifact_repo(MODEL_FILE, Vec::new(), None, Duration::ZERO).await;
    let cache = tempdir().unwrap();
    let spec = spec_for(&repo.endpoint, cache.path(), MODEL_FILE);

    let err = provisioner().ensure(&spec).await.unwrap_err();

    assert!(matches!(err, ProvisionError::EmptyArtifact { .. }));
    assert!(!spec.local_path().exists());
}
