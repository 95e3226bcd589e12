//! Core domain logic for the personal news knowledge base's
//! ingestion-to-retrieval engine: entities, the recursive chunker, the
//! embedding and reranker traits with their scoring math, the error
//! taxonomy, and the metadata store contract.
//!
//! Kept free of `tokio`/`sqlx`/network dependencies so it can be reused by
//! anything that needs the domain rules without the native runtime — the
//! `newsdesk` crate supplies the SQLite-backed store, the on-disk vector
//! index, and everything that talks to the network.

pub mod chunk;
pub mod embedding;
pub mod errors;
pub mod models;
pub mod reranker;
pub mod store;
