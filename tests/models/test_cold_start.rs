// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Concurrent first requests against a cold cache.

use axum::http::StatusCode;
use futures::future::join_all;
use radiant_embed_node::{inference::EngineConfig, models::HttpArtifactFetcher};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{
    build_app, get_health, post_embeddings, spawn_artifact_repo, HashFactory, MODEL_FILE,
};

const CONCURRENT_REQUESTS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cold_requests_download_and_load_once() {
    let repo = spawn_artifact_repo(
        MODEL_FILE,
        b"GGUF-weights".to_vec(),
        None,
        Duration::from_millis(200),
    )
    .await;

    let fetcher = HttpArtifactFetcher::new().unwrap().with_progress(false);
    let factory = Arc::new(HashFactory::with_load_delay(Duration::from_millis(100)));
    let endpoint = repo.endpoint.clone();
    let app = build_app(
        Arc::new(fetcher),
        EngineConfig::default(),
        factory.clone(),
        |spec| spec.endpoint = endpoint,
    );

    let requests = (0..CONCURRENT_REQUESTS).map(|i| {
        let router = app.router.clone();
        async move {
            let body = format!(r#"{{"input": ["request {}"]}}"#, i);
            post_embeddings(&router, &body).await
        }
    });
    let results = join_all(requests).await;

    for (status, body) in &results {
        assert_eq!(*status, StatusCode::OK, "body: {}", body);
    }
    assert_eq!(repo.downloads(), 1);
    assert_eq!(app.manager.provisioner().stats().downloads, 1);
    assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);
    assert_eq!(app.manager.constructions(), 1);

    let (_, health) = get_health(&app.router).await;
    assert_eq!(health["engine"]["state"], "ready");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_failed_init() {
    // Nothing listens here, so every attempt fails.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let fetcher = HttpArtifactFetcher::new().unwrap().with_progress(false);
    let factory = Arc::new(HashFactory::default());
    let app = build_app(
        Arc::new(fetcher),
        EngineConfig::default(),
        factory.clone(),
        |spec| spec.endpoint = endpoint,
    );

    let requests = (0..4).map(|_| {
        let router = app.router.clone();
        async move { post_embeddings(&router, r#"{"input": ["x"]}"#).await }
    });
    for (status, _) in join_all(requests).await {
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    assert_eq!(factory.constructions.load(Ordering::SeqCst), 0);
    assert!(!app.cache.path().join(MODEL_FILE).exists());
}
