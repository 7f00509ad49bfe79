// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the Radiant embedding node

/// Full version string with feature description
pub const VERSION: &str = "v0.1.0-gguf-embeddings-2026-10-19";

/// Semantic version number
pub const VERSION_NUMBER: &str = env!("CARGO_PKG_VERSION");

/// Build date
pub const BUILD_DATE: &str = "2026-10-19";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "openai-embeddings",
    "gguf-models",
    "lazy-model-provisioning",
    "atomic-model-cache",
    "per-input-isolation",
    "l2-normalization",
    "input-truncation",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("Radiant Embed Node {} ({})", VERSION_NUMBER, BUILD_DATE)
}
