// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::http::StatusCode;
use radiant_embed_node::inference::EngineConfig;
use std::sync::Arc;

use crate::common::{get_health, post_embeddings, test_app, StaticFetcher, DIMENSION, MODEL_FILE};

#[tokio::test]
async fn test_health_before_first_request() {
    let app = test_app(Arc::new(StaticFetcher::default()), EngineConfig::default());

    let (status, body) = get_health(&app.router).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model"], MODEL_FILE);
    assert_eq!(body["engine"]["state"], "uninitialized");
    assert!(body["version"].is_string());
    assert!(body["started_at"].is_string());

    // Health never loads the model.
    assert_eq!(app.manager.constructions(), 0);
}

#[tokio::test]
async fn test_health_after_load() {
    let app = test_app(Arc::new(StaticFetcher::default()), EngineConfig::default());
    post_embeddings(&app.router, r#"{"input": ["warm"]}"#).await;

    let (_, body) = get_health(&app.router).await;

    assert_eq!(body["engine"]["state"], "ready");
    assert_eq!(body["engine"]["dimension"], DIMENSION);
}

#[tokio::test]
async fn test_health_reports_failed_init() {
    let app = test_app(Arc::new(StaticFetcher::offline()), EngineConfig::default());
    post_embeddings(&app.router, r#"{"input": ["a"]}"#).await;

    let (status, body) = get_health(&app.router).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["engine"]["state"], "failed");
    assert!(body["engine"]["last_error"]
        .as_str()
        .unwrap()
        .contains("connection refused"));
}
