//! Wires the configured local cross-encoder model to the
//! [`newsdesk_core::reranker::Reranker`] contract. Mirrors `embedder.rs`'s
//! build-with-fallback shape: a tract-onnx backend for the real
//! `ms-marco-MiniLM-L6-v2` cross-encoder, falling back to the deterministic
//! term-overlap scorer if the model can't be loaded (no network access to
//! the model cache, unsupported `model_id`, and so on). Never fails.

#[cfg(feature = "local-reranker-tract")]
mod local_tract;

use std::sync::Arc;

use newsdesk_core::reranker::{Reranker, TermOverlapReranker};
use tracing::warn;

use crate::config::RerankerConfig;

/// Builds the configured reranker. Never fails: a model load error is
/// logged and the deterministic term-overlap reranker is used in its place.
pub async fn build_reranker(config: &RerankerConfig) -> Arc<dyn Reranker> {
    #[cfg(feature = "local-reranker-tract")]
    {
        if config.model_id != "term-overlap-v1" {
            match local_tract::TractCrossEncoderReranker::load(config).await {
                Ok(reranker) => return Arc::new(reranker),
                Err(e) => warn!(error = %e, "cross-encoder model load failed, falling back to term-overlap reranker"),
            }
        }
    }

    let _ = config;
    Arc::new(TermOverlapReranker)
}
