//! Tract-based local embedding (fallback for platforms that can't fetch
//! prebuilt ONNX Runtime binaries). Pure-Rust path: loads an ONNX model
//! with tract-onnx, tokenizes with the `tokenizers` crate, runs inference
//! on a blocking thread. No ONNX Runtime or system deps.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use newsdesk_core::embedding::{Embedder, EMBEDDING_DIMS};
use tract_onnx::prelude::*;

use crate::config::EmbedderConfig;

const ALL_MINILM_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
const DEFAULT_MAX_LEN: usize = 256;

fn model_manifest(model_id: &str) -> Result<(&'static str, &'static str)> {
    match model_id.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(("onnx/model.onnx", "tokenizer.json")),
        other => bail!("tract backend supports only all-minilm-l6-v2, requested '{other}'"),
    }
}

fn cache_dir() -> Result<PathBuf> {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(base).join(".cache").join("newsdesk").join("models");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

async fn download_to_cache(path_rel: &str, cache_path: &std::path::Path) -> Result<()> {
    if cache_path.exists() {
        return Ok(());
    }
    let url = format!("https://huggingface.co/{ALL_MINILM_REPO}/resolve/main/{}", path_rel.replace(' ', "%20"));
    let resp = reqwest::get(&url).await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(cache_path, &bytes)?;
    Ok(())
}

async fn ensure_cached(model_id: &str) -> Result<(PathBuf, PathBuf)> {
    let (onnx_rel, tokenizer_rel) = model_manifest(model_id)?;
    let model_dir = cache_dir()?.join(model_id.to_lowercase());
    let onnx_path = model_dir.join(onnx_rel);
    let tokenizer_path = model_dir.join(tokenizer_rel);
    download_to_cache(onnx_rel, &onnx_path).await?;
    download_to_cache(tokenizer_rel, &tokenizer_path).await?;
    Ok((onnx_path, tokenizer_path))
}

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct TractEmbedder {
    model: Mutex<TractModel>,
    tokenizer: tokenizers::Tokenizer,
    model_id: String,
}

impl TractEmbedder {
    pub async fn load(config: &EmbedderConfig) -> Result<Self> {
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

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self.tokenizer.encode(text, true).map_err(|e| anyhow!("tokenize: {e}"))?;
        let ids = encoding.get_ids();
        let len = ids.len().min(DEFAULT_MAX_LEN).max(1);
        let input_ids: Vec<i64> = ids.iter().take(len).map(|&id| id as i64).collect();
        let attention_mask = vec![1i64; len];

        let input_ids_t: Tensor = ndarray::Array2::from_shape_vec((1, len), input_ids)?.into();
        let attention_mask_t: Tensor = ndarray::Array2::from_shape_vec((1, len), attention_mask)?.into();

        let model = self.model.lock().expect("tract model mutex poisoned");
        let result = model.run(tvec!(input_ids_t.into(), attention_mask_t.into()))?;
        let output = result.into_iter().next().ok_or_else(|| anyhow!("no output tensor"))?;
        let view = output.to_array_view::<f32>().map_err(|e| anyhow!("output to array: {e}"))?;

        // [batch, seq_len, dims] last_hidden_state, mean-pooled; or already [batch, dims].
        let shape = view.shape();
        let mut pooled = match shape.len() {
            2 => view.slice(ndarray::s![0, ..]).iter().copied().collect::<Vec<f32>>(),
            3 => {
                let seq_len = shape[1].min(len);
                let mut sum = vec![0.0_f32; shape[2]];
                for j in 0..seq_len {
                    for (k, &v) in view.slice(ndarray::s![0, j, ..]).iter().enumerate() {
                        sum[k] += v;
                    }
                }
                if seq_len > 0 {
                    for v in sum.iter_mut() {
                        *v /= seq_len as f32;
                    }
                }
                sum
            }
            other => bail!("unexpected tract output rank: {other}"),
        };
        pooled.resize(EMBEDDING_DIMS, 0.0);
        Ok(pooled)
    }
}

impl Embedder for TractEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        EMBEDDING_DIMS
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_one(text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "tract inference failed, returning zero vector");
            vec![0.0; EMBEDDING_DIMS]
        })
    }
}
