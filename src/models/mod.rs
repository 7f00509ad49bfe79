// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod downloading;

pub use downloading::{
    ArtifactFetcher, HttpArtifactFetcher, ModelProvisioner, ModelSpec, ProvisionError,
    ProvisionStats, DEFAULT_ENDPOINT, DEFAULT_REVISION,
};
