// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! OpenAI-compatible `POST /v1/embeddings` endpoint.

pub mod handler;
pub mod request;
pub mod response;

pub use handler::embeddings_handler;
pub use request::EmbeddingRequest;
pub use response::{
    assemble, l2_normalize, EmbeddingData, EmbeddingFailure, EmbeddingResponse, Usage,
};
