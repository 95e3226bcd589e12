//! TOML configuration, one section per component, each with defaults so a
//! minimal file (or none at all) still produces a runnable configuration.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub web_fallback: WebFallbackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            server: ServerConfig::default(),
            embedder: EmbedderConfig::default(),
            reranker: RerankerConfig::default(),
            llm: LlmConfig::default(),
            vector_store: VectorStoreConfig::default(),
            fetcher: FetcherConfig::default(),
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            search: SearchConfig::default(),
            upload: UploadConfig::default(),
            web_fallback: WebFallbackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/newsdesk.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedderConfig {
    #[serde(default = "default_embedder_model_id")]
    pub model_id: String,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self { model_id: default_embedder_model_id(), batch_size: default_embed_batch_size() }
    }
}

fn default_embedder_model_id() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_embed_batch_size() -> usize {
    newsdesk_core::embedding::DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_model_id")]
    pub model_id: String,
    #[serde(default = "default_rerank_batch_size")]
    pub batch_size: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self { model_id: default_reranker_model_id(), batch_size: default_rerank_batch_size() }
    }
}

fn default_reranker_model_id() -> String {
    "ms-marco-minilm-l6-v2".to_string()
}

fn default_rerank_batch_size() -> usize {
    newsdesk_core::reranker::DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model_id")]
    pub model_id: String,
    #[serde(default = "default_llm_timeout_s")]
    pub timeout_s: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model_id: default_llm_model_id(),
            timeout_s: default_llm_timeout_s(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_llm_model_id() -> String {
    "local-llm".to_string()
}

fn default_llm_timeout_s() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_store_root")]
    pub root: PathBuf,
    #[serde(default = "default_compact_threshold_ratio")]
    pub compact_threshold_ratio: f64,
    #[serde(default = "default_compact_threshold_count")]
    pub compact_threshold_count: usize,
    #[serde(default = "default_lru_capacity")]
    pub lru_capacity: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            root: default_vector_store_root(),
            compact_threshold_ratio: default_compact_threshold_ratio(),
            compact_threshold_count: default_compact_threshold_count(),
            lru_capacity: default_lru_capacity(),
        }
    }
}

fn default_vector_store_root() -> PathBuf {
    PathBuf::from("./data/vectors")
}

fn default_compact_threshold_ratio() -> f64 {
    0.2
}

fn default_compact_threshold_count() -> usize {
    1_000
}

fn default_lru_capacity() -> usize {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_per_host_rps")]
    pub per_host_rps: f64,
    #[serde(default = "default_fetch_timeout_s")]
    pub timeout_s: u64,
    #[serde(default)]
    pub proxies: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            per_host_rps: default_per_host_rps(),
            timeout_s: default_fetch_timeout_s(),
            proxies: Vec::new(),
        }
    }
}

fn default_user_agent() -> String {
    "newsdesk/0.1 (+https://github.com/newsdesk-rs/newsdesk)".to_string()
}

fn default_per_host_rps() -> f64 {
    1.0
}

fn default_fetch_timeout_s() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_rss_cadence")]
    pub rss_default_cadence_s: i64,
    #[serde(default = "default_web_sweep_hour")]
    pub web_sweep_hour_utc: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rss_default_cadence_s: default_rss_cadence(),
            web_sweep_hour_utc: default_web_sweep_hour(),
        }
    }
}

fn default_rss_cadence() -> i64 {
    1_800
}

fn default_web_sweep_hour() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_drain_deadline_s")]
    pub drain_deadline_s: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_executor_workers(),
            queue_capacity: default_queue_capacity(),
            drain_deadline_s: default_drain_deadline_s(),
        }
    }
}

fn default_executor_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_drain_deadline_s() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: i64,
    #[serde(default = "default_external_trigger_threshold")]
    pub external_trigger_threshold: f64,
    #[serde(default = "default_external_trigger_min_results")]
    pub external_trigger_min_results: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            external_trigger_threshold: default_external_trigger_threshold(),
            external_trigger_min_results: default_external_trigger_min_results(),
        }
    }
}

fn default_search_limit() -> i64 {
    10
}

fn default_external_trigger_threshold() -> f64 {
    0.35
}

fn default_external_trigger_min_results() -> i64 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { max_bytes: default_max_bytes() }
    }
}

fn default_max_bytes() -> u64 {
    16 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebFallbackConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_web_fallback_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_external_hits")]
    pub max_hits: usize,
}

impl Default for WebFallbackConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_web_fallback_endpoint(),
            max_hits: default_max_external_hits(),
        }
    }
}

fn default_web_fallback_endpoint() -> String {
    "https://api.search.example/v1/search".to_string()
}

fn default_max_external_hits() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let config: Config = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)?
    } else {
        Config::default()
    };

    if config.executor.workers == 0 {
        bail!("executor.workers must be >= 1");
    }
    if config.vector_store.lru_capacity == 0 {
        bail!("vector_store.lru_capacity must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.search.external_trigger_threshold) {
        bail!("search.external_trigger_threshold must be in [0,1]");
    }
    if config.search.default_limit <= 0 || config.search.default_limit > 100 {
        bail!("search.default_limit must be in [1,100]");
    }

    Ok(config)
}
