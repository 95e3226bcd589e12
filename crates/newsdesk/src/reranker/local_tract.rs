//! Tract-based cross-encoder reranker. Loads an ONNX sequence-classification
//! model (default `cross-encoder/ms-marco-MiniLM-L6-v2`) and the matching
//! tokenizer, encodes each `(query, passage)` pair jointly with
//! `token_type_ids` distinguishing the two segments, and takes the model's
//! single relevance logit as the raw score. Same cache-on-disk, run-on-a-
//! blocking-thread shape as `embedder/local_tract.rs`.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use newsdesk_core::reranker::Reranker;
use tract_onnx::prelude::*;

use crate::config::RerankerConfig;

const MS_MARCO_REPO: &str = "cross-encoder/ms-marco-MiniLM-L6-v2";
const MAX_LEN: usize = 512;

fn model_manifest(model_id: &str) -> Result<(&'static str, &'static str, &'static str)> {
    match model_id.to_lowercase().as_str() {
        "ms-marco-minilm-l6-v2" => Ok((MS_MARCO_REPO, "onnx/model.onnx", "tokenizer.json")),
        other => bail!("tract reranker backend supports only ms-marco-minilm-l6-v2, requested '{other}'"),
    }
}

fn cache_dir() -> Result<PathBuf> {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(base).join(".cache").join("newsdesk").join("models");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

async fn download_to_cache(repo: &str, path_rel: &str, cache_path: &std::path::Path) -> Result<()> {
    if cache_path.exists() {
        return Ok(());
    }
    let url = format!("https://huggingface.co/{repo}/resolve/main/{}", path_rel.replace(' ', "%20"));
    let resp = reqwest::get(&url).await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(cache_path, &bytes)?;
    Ok(())
}

async fn ensure_cached(model_id: &str) -> Result<(PathBuf, PathBuf)> {
    let (repo, onnx_rel, tokenizer_rel) = model_manifest(model_id)?;
    let model_dir = cache_dir()?.join(model_id.to_lowercase());
    let onnx_path = model_dir.join(onnx_rel);
    let tokenizer_path = model_dir.join(tokenizer_rel);
    download_to_cache(repo, onnx_rel, &onnx_path).await?;
    download_to_cache(repo, tokenizer_rel, &tokenizer_path).await?;
    Ok((onnx_path, tokenizer_path))
}

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct TractCrossEncoderReranker {
    model: Mutex<TractModel>,
    tokenizer: tokenizers::Tokenizer,
    model_id: String,
}

impl TractCrossEncoderReranker {
    pub async fn load(config: &RerankerConfig) -> Result<Self> {
        let (onnx_path, tokenizer_path) = ensure_cached(&config.model_id).await?;
        let model_id = config.model_id.clone();
        tokio::task::spawn_blocking(move || Self::load_blocking(&onnx_path, &tokenizer_path, model_id)).await?
    }

    fn load_blocking(onnx_path: &std::path::Path, tokenizer_path: &std::path::Path, model_id: String) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path).map_err(|e| anyhow!("load tokenizer: {e}"))?;

        let model = tract_onnx::onnx()
            .model_for_path(onnx_path)
            .map_err(|e| anyhow!("load onnx: {e}"))?
            .into_optimized()
            .map_err(|e| anyhow!("optimize onnx: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow!("build tract runnable: {e}"))?;

        Ok(Self { model: Mutex::new(model), tokenizer, model_id })
    }

    fn score_one(&self, query: &str, passage: &str) -> Result<f64> {
        let encoding = self
            .tokenizer
            .encode((query, passage), true)
            .map_err(|e| anyhow!("tokenize pair: {e}"))?;

        let len = encoding.get_ids().len().min(MAX_LEN).max(1);
        let input_ids: Vec<i64> = encoding.get_ids().iter().take(len).map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding.get_attention_mask().iter().take(len).map(|&m| m as i64).collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().take(len).map(|&t| t as i64).collect();

        let input_ids_t: Tensor = ndarray::Array2::from_shape_vec((1, len), input_ids)?.into();
        let attention_mask_t: Tensor = ndarray::Array2::from_shape_vec((1, len), attention_mask)?.into();
        let token_type_ids_t: Tensor = ndarray::Array2::from_shape_vec((1, len), token_type_ids)?.into();

        let model = self.model.lock().expect("tract reranker mutex poisoned");
        let result = model.run(tvec!(input_ids_t.into(), attention_mask_t.into(), token_type_ids_t.into()))?;
        let output = result.into_iter().next().ok_or_else(|| anyhow!("no output tensor"))?;
        let view = output.to_array_view::<f32>().map_err(|e| anyhow!("output to array: {e}"))?;

        // [batch, 1] regression logit, or [batch, 2] two-class logits — the
        // relevance score is the last column either way.
        let flat: Vec<f32> = view.iter().copied().collect();
        flat.last().copied().map(|v| v as f64).ok_or_else(|| anyhow!("empty logits"))
    }
}

impl Reranker for TractCrossEncoderReranker {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn rerank(&self, query: &str, passages: &[String]) -> Vec<f64> {
        passages
            .iter()
            .map(|passage| {
                self.score_one(query, passage).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "cross-encoder inference failed, scoring passage 0.0");
                    0.0
                })
            })
            .collect()
    }
}
