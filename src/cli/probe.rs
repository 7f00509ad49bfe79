// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::api::{EmbeddingResponse, HealthResponse};

/// Arguments for the probe command
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Base URL of a running embedding server
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub base_url: String,

    /// Number of timed requests
    #[arg(long, default_value_t = 10)]
    pub count: usize,

    /// Untimed requests sent first (the first one may load the model)
    #[arg(long, default_value_t = 1)]
    pub warmup: usize,

    /// Input text; repeat the flag to send a batch
    #[arg(long = "input")]
    pub inputs: Vec<String>,

    /// batch_size to send with each request
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Ask the server for unit-norm vectors
    #[arg(long, overrides_with = "no_normalize")]
    pub normalize: bool,

    /// Ask the server for raw vectors
    #[arg(long, overrides_with = "normalize")]
    pub no_normalize: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60.0)]
    pub timeout: f64,
}

impl ProbeArgs {
    fn normalize(&self) -> bool {
        !self.no_normalize
    }

    fn payload(&self) -> serde_json::Value {
        let inputs = if self.inputs.is_empty() {
            vec!["The quick brown fox jumps over the lazy dog.".to_string()]
        } else {
            self.inputs.clone()
        };
        let mut payload = json!({
            "input": inputs,
            "normalize": self.normalize(),
        });
        if let Some(batch_size) = self.batch_size {
            payload["batch_size"] = json!(batch_size);
        }
        payload
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub mean_ms: f64,
    pub median_ms: f64,
    pub fastest_ms: f64,
    pub slowest_ms: f64,
}

pub fn summarize(samples: &[Duration]) -> Option<LatencySummary> {
    if samples.is_empty() {
        return None;
    }
    let mut ms: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    ms.sort_by(|a, b| a.total_cmp(b));

    let mid = ms.len() / 2;
    let median_ms = if ms.len() % 2 == 0 {
        (ms[mid - 1] + ms[mid]) / 2.0
    } else {
        ms[mid]
    };

    Some(LatencySummary {
        mean_ms: ms.iter().sum::<f64>() / ms.len() as f64,
        median_ms,
        fastest_ms: ms[0],
        slowest_ms: ms[ms.len() - 1],
    })
}

async fn send(
    client: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
) -> Result<EmbeddingResponse> {
    let response = client
        .post(url)
        .json(payload)
        .send()
        .await
        .context("embedding request failed")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("server returned {}: {}", status, body));
    }
    response
        .json::<EmbeddingResponse>()
        .await
        .context("could not decode embedding response")
}

/// Measures end-to-end embedding latency against a running server.
pub async fn run_probe(args: ProbeArgs) -> Result<()> {
    if args.count == 0 {
        return Err(anyhow!("--count must be at least 1"));
    }
    if args.timeout.is_nan() || args.timeout <= 0.0 {
        return Err(anyhow!("--timeout must be positive"));
    }

    let base = url::Url::parse(&args.base_url).context("invalid --base-url")?;
    let health_url = base.join("health")?;
    let embed_url = base.join("v1/embeddings")?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs_f64(args.timeout))
        .build()?;

    let health: HealthResponse = client
        .get(health_url)
        .send()
        .await
        .context("server is not reachable")?
        .error_for_status()?
        .json()
        .await?;
    info!(
        status = %health.status,
        model = %health.model,
        engine = ?health.engine.state,
        "Server is up"
    );

    let payload = args.payload();
    let url = embed_url.as_str();

    for round in 0..args.warmup {
        let started = Instant::now();
        if let Err(e) = send(&client, url, &payload).await {
            warn!(round, error = %e, "Warmup request failed");
        } else {
            info!(round, elapsed_ms = started.elapsed().as_millis() as u64, "Warmup done");
        }
    }

    let mut samples = Vec::with_capacity(args.count);
    let mut dimension = None;
    for _ in 0..args.count {
        let started = Instant::now();
        let response = send(&client, url, &payload).await?;
        samples.push(started.elapsed());
        dimension = response.dimension();
    }

    if let Some(summary) = summarize(&samples) {
        println!("Model:      {}", health.model);
        if let Some(dimension) = dimension {
            println!("Dimension:  {}", dimension);
        }
        println!("Requests:   {}", samples.len());
        println!("Mean:       {:.2} ms", summary.mean_ms);
        println!("Median:     {:.2} ms", summary.median_ms);
        println!("Fastest:    {:.2} ms", summary.fastest_ms);
        println!("Slowest:    {:.2} ms", summary.slowest_ms);
    }
    Ok(())
}
