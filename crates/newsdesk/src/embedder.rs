//! Wires the configured local sentence-embedding model to the
//! [`newsdesk_core::embedding::Embedder`] contract: fastembed (bundled ORT,
//! rustls) is the primary backend, tract-onnx the pure-Rust fallback for
//! platforms that can't fetch prebuilt ORT binaries. Falls back further to
//! the deterministic hash embedder if the model can't be loaded at all, so
//! a box with no network access to the model cache still boots.

#[cfg(feature = "local-embeddings-tract")]
mod local_tract;

use std::sync::Arc;

use newsdesk_core::embedding::{Embedder, HashEmbedder};
use tracing::warn;

use crate::config::EmbedderConfig;

/// Builds the configured embedder. Never fails: a model load error is
/// logged and the deterministic hash embedder is used in its place.
pub async fn build_embedder(config: &EmbedderConfig) -> Arc<dyn Embedder> {
    #[cfg(feature = "local-embeddings-fastembed")]
    {
        match FastEmbedEmbedder::load(config.clone()).await {
            Ok(embedder) => return Arc::new(embedder),
            Err(e) => warn!(error = %e, "fastembed model load failed, falling back to hash embedder"),
        }
    }

    #[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
    {
        match local_tract::TractEmbedder::load(config).await {
            Ok(embedder) => return Arc::new(embedder),
            Err(e) => warn!(error = %e, "tract model load failed, falling back to hash embedder"),
        }
    }

    let _ = config;
    Arc::new(HashEmbedder::default())
}

#[cfg(feature = "local-embeddings-fastembed")]
pub struct FastEmbedEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    model_id: String,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl FastEmbedEmbedder {
    /// Model download and session construction both block, so this runs on
    /// a blocking thread rather than stalling the async runtime at startup.
    async fn load(config: EmbedderConfig) -> anyhow::Result<Self> {
        tokio::task::spawn_blocking(move || Self::load_blocking(&config)).await?
    }

    fn load_blocking(config: &EmbedderConfig) -> anyhow::Result<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let variant = match config.model_id.to_lowercase().as_str() {
            "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            other => anyhow::bail!("unsupported fastembed model id: {other}"),
        };
        let model = TextEmbedding::try_new(InitOptions::new(variant).with_show_download_progress(false))?;
        Ok(Self {
            model: std::sync::Mutex::new(model),
            model_id: config.model_id.clone(),
            batch_size: config.batch_size.max(1),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
impl Embedder for FastEmbedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        newsdesk_core::embedding::EMBEDDING_DIMS
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_batch(std::slice::from_ref(&text.to_string()))
            .into_iter()
            .next()
            .unwrap_or_else(|| vec![0.0; self.dims()])
    }

    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut model = self.model.lock().expect("embedder mutex poisoned");
        match model.embed(texts.to_vec(), Some(self.batch_size)) {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(error = %e, "fastembed inference failed, returning zero vectors for this batch");
                texts.iter().map(|_| vec![0.0_f32; self.dims()]).collect()
            }
        }
    }
}
