//! Native runtime for the personal news knowledge base: scheduled
//! acquisition (RSS, web, upload), a per-user on-disk vector index, and a
//! reranked semantic retrieval API served over HTTP.
//!
//! Domain-level types and storage-agnostic logic (models, chunker, embedder
//! and reranker traits, the in-memory store used by tests) live in
//! `newsdesk-core`; everything here is the concrete, I/O-touching half:
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`config`] | TOML configuration, one section per component |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | `MetadataStore` backed by SQLite |
//! | [`vector_store`] | Per-user on-disk vector index manager |
//! | [`embedder`] | Local sentence-embedding model wiring |
//! | [`dedup`] | Duplicate detection ahead of ingest |
//! | [`executor`] | Fixed-size background worker pool |
//! | [`fetcher`] | Rate-limited, robots-aware HTTP fetch |
//! | [`rss_crawler`] | RSS/Atom polling |
//! | [`web_scraper`] | Selector-based article extraction |
//! | [`structured_importer`] | CSV/XLSX bulk upload parsing |
//! | [`ingest`] | Acquisition → dedup → chunk → embed → store orchestration |
//! | [`scheduler`] | RSS poll / web sweep / weekly maintenance tick loops |
//! | [`retrieval`] | Staged semantic search pipeline |
//! | [`web_fallback`] | External search provider |
//! | [`llm_client`] | Streaming LLM client for summarization |
//! | [`progress`] | SSE progress protocol |
//! | [`reranker`] | Local cross-encoder model wiring |
//! | [`server`] | Axum HTTP API |

pub mod config;
pub mod db;
pub mod dedup;
pub mod embedder;
pub mod executor;
pub mod fetcher;
pub mod ingest;
pub mod llm_client;
pub mod migrate;
pub mod progress;
pub mod reranker;
pub mod retrieval;
pub mod rss_crawler;
pub mod scheduler;
pub mod server;
pub mod sqlite_store;
pub mod structured_importer;
pub mod vector_store;
pub mod web_fallback;
pub mod web_scraper;
