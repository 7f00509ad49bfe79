// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! POST /v1/embeddings through the full router.

use axum::http::StatusCode;
use radiant_embed_node::inference::EngineConfig;
use axum::{body::Body, http::Request};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{
    as_vector, build_app_with_timeout, hash_vector, l2_norm, post_embeddings, send, test_app,
    token_count, HashFactory, StaticFetcher, DIMENSION, FAIL_MARKER, MODEL_FILE, REPO_ID,
};

fn default_app() -> crate::common::TestApp {
    test_app(Arc::new(StaticFetcher::default()), EngineConfig::default())
}

#[tokio::test]
async fn test_single_input_raw_vector() {
    let app = default_app();

    let (status, body) =
        post_embeddings(&app.router, r#"{"input": ["a"], "normalize": false}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");
    assert_eq!(body["model"], format!("{}:{}", REPO_ID, MODEL_FILE));

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["index"], 0);
    assert_eq!(data[0]["object"], "embedding");
    assert_eq!(as_vector(&data[0]["embedding"]), hash_vector("a", DIMENSION));
    assert_eq!(data[0]["embedding"].as_array().unwrap().len(), DIMENSION);

    assert_eq!(body["usage"]["prompt_tokens"], token_count("a"));
    assert_eq!(body["usage"]["total_tokens"], token_count("a"));
    assert!(body.get("errors").is_none());
}

#[tokio::test]
async fn test_bare_string_input() {
    let app = default_app();

    let (status, body) = post_embeddings(&app.router, r#"{"input": "hello"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_two_inputs_normalized() {
    let app = default_app();

    let (status, body) = post_embeddings(
        &app.router,
        r#"{"input": ["hello world", "goodbye"], "normalize": true}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    for (i, record) in data.iter().enumerate() {
        assert_eq!(record["index"], i);
        assert!((l2_norm(&record["embedding"]) - 1.0).abs() < 1e-4);
    }
    assert_eq!(
        body["usage"]["total_tokens"],
        token_count("hello world") + token_count("goodbye")
    );
}

#[tokio::test]
async fn test_normalize_defaults_to_true() {
    let app = default_app();

    let (_, body) = post_embeddings(&app.router, r#"{"input": ["some text"]}"#).await;

    assert!((l2_norm(&body["data"][0]["embedding"]) - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn test_order_preserved_under_batching() {
    let config = EngineConfig {
        max_batch_size: 3,
        ..EngineConfig::default()
    };
    let app = test_app(Arc::new(StaticFetcher::default()), config);
    let inputs: Vec<String> = (0..10).map(|i| format!("input number {}", i)).collect();
    let payload = serde_json::json!({ "input": inputs, "normalize": false }).to_string();

    let (status, body) = post_embeddings(&app.router, &payload).await;

    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), inputs.len());
    for (i, record) in data.iter().enumerate() {
        assert_eq!(record["index"], i);
        assert_eq!(as_vector(&record["embedding"]), hash_vector(&inputs[i], DIMENSION));
    }
    // 10 inputs in batches of 3
    assert_eq!(app.factory.embed_calls(), 4);
}

#[tokio::test]
async fn test_batching_does_not_change_vectors() {
    let app = default_app();

    let (_, alone) = post_embeddings(&app.router, r#"{"input": ["goodbye"]}"#).await;
    let (_, batched) = post_embeddings(
        &app.router,
        r#"{"input": ["hello world", "goodbye", "later"], "batch_size": 2}"#,
    )
    .await;

    let a = as_vector(&alone["data"][0]["embedding"]);
    let b = as_vector(&batched["data"][1]["embedding"]);
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_empty_input_rejected_without_engine_work() {
    let app = default_app();

    let (status, body) = post_embeddings(&app.router, r#"{"input": []}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "validation_error");
    assert_eq!(body["details"]["field"], "input");
    assert!(body["request_id"].is_string());
    assert_eq!(app.manager.constructions(), 0);
    assert_eq!(app.manager.provisioner().stats().downloads, 0);
    assert_eq!(app.factory.embed_calls(), 0);
}

#[tokio::test]
async fn test_blank_inputs_rejected_without_engine_work() {
    let app = default_app();

    let (status, body) = post_embeddings(&app.router, r#"{"input": ["  ", "\t\n"]}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "input[0]");
    assert_eq!(app.manager.constructions(), 0);
    assert_eq!(app.factory.embed_calls(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let app = default_app();

    let (status, body) = post_embeddings(&app.router, r#"{"input": 42}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "invalid_request");

    let (status, _) = post_embeddings(&app.router, "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_zero_batch_size_is_400() {
    let app = default_app();

    let (status, body) =
        post_embeddings(&app.router, r#"{"input": ["a"], "batch_size": 0}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "batch_size");
}

#[tokio::test]
async fn test_oversized_input_fails_alone() {
    let config = EngineConfig {
        context_window: 4,
        ..EngineConfig::default()
    };
    let app = test_app(Arc::new(StaticFetcher::default()), config);

    let (status, body) = post_embeddings(
        &app.router,
        r#"{"input": ["short", "this input has far too many words", "also short"]}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let indices: Vec<u64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["index"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 2]);

    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["index"], 1);
    assert_eq!(errors[0]["type"], "input_too_long");
    assert_eq!(
        body["usage"]["prompt_tokens"],
        token_count("short") + token_count("also short")
    );
}

#[tokio::test]
async fn test_engine_failure_is_isolated_and_handle_survives() {
    let app = default_app();
    let payload = serde_json::json!({ "input": ["fine", format!("bad {}", FAIL_MARKER)] });

    let (status, body) = post_embeddings(&app.router, &payload.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["errors"][0]["type"], "inference_error");

    let (status, _) = post_embeddings(&app.router, r#"{"input": ["again"]}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.manager.constructions(), 1);
}

#[tokio::test]
async fn test_all_inputs_failing_is_500() {
    let app = default_app();
    let payload = serde_json::json!({ "input": [FAIL_MARKER] });

    let (status, body) = post_embeddings(&app.router, &payload.to_string()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error_type"], "embedding_failed");
    assert_eq!(body["details"]["errors"][0]["index"], 0);
}

#[tokio::test]
async fn test_provisioning_failure_is_503_then_retried() {
    let fetcher = Arc::new(StaticFetcher::offline());
    let app = test_app(fetcher.clone(), EngineConfig::default());

    let (status, body) = post_embeddings(&app.router, r#"{"input": ["a"]}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error_type"], "artifact_unavailable");
    assert!(!body["message"]
        .as_str()
        .unwrap()
        .contains(&app.cache.path().display().to_string()));

    // Still failing: every request retries rather than caching the failure.
    let (status, _) = post_embeddings(&app.router, r#"{"input": ["a"]}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

    fetcher.offline.store(false, Ordering::SeqCst);
    let (status, body) = post_embeddings(&app.router, r#"{"input": ["a"]}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(app.manager.constructions(), 1);
}

#[tokio::test]
async fn test_model_field_is_ignored() {
    let app = default_app();

    let (status, body) = post_embeddings(
        &app.router,
        r#"{"input": ["a"], "model": "text-embedding-3-small"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], format!("{}:{}", REPO_ID, MODEL_FILE));
}

#[tokio::test]
async fn test_request_timeout_returns_error_body() {
    let factory = Arc::new(HashFactory::with_load_delay(Duration::from_millis(400)));
    let app = build_app_with_timeout(
        Arc::new(StaticFetcher::default()),
        EngineConfig::default(),
        factory.clone(),
        |_| {},
        Duration::from_millis(100),
    );

    let (status, body) = post_embeddings(&app.router, r#"{"input": ["slow start"]}"#).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error_type"], "timeout");
    assert!(body["message"].is_string());
    assert!(body["request_id"].is_string());

    // The load started by the timed-out request completes in the background.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let (status, _) = post_embeddings(&app.router, r#"{"input": ["warm now"]}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_route_returns_error_body() {
    let app = default_app();
    let request = Request::builder()
        .uri("/v1/completions")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_type"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("/v1/completions"));
}
