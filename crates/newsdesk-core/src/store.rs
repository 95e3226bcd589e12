//! The durable relational store's typed contract: users, documents,
//! sources, tags, and search history. Concrete storage (SQLite, in-memory)
//! implements this trait; callers never see SQL.

use async_trait::async_trait;

use crate::errors::CoreResult;
use crate::models::{Document, IndexedState, Source, SourceKind, User};

/// Filter clause for [`MetadataStore::list_documents`]. All fields are
/// optional and compose with AND semantics.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub source_type: Option<String>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    pub tags_any: Vec<String>,
    pub text_like: Option<String>,
}

/// Offset/limit pagination with deterministic order `(created_at DESC, id
/// DESC)`.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 20 }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TagCount {
    pub name: String,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TrendingQuery {
    pub query: String,
    pub count: i64,
    pub avg_elapsed_ms: f64,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_user(&self, user: &User) -> CoreResult<()>;
    async fn get_user(&self, id: &str) -> CoreResult<Option<User>>;

    /// Inserts a new Document. Callers are responsible for having already
    /// checked the Deduper; a store-level unique-constraint violation on
    /// `(user_id, source_url)` or `(user_id, content_hash)` surfaces as
    /// [`crate::errors::CoreError::Duplicate`].
    async fn put_document(&self, doc: &Document) -> CoreResult<()>;
    async fn get_document(&self, user_id: &str, id: &str) -> CoreResult<Option<Document>>;
    async fn find_by_source_url(&self, user_id: &str, source_url: &str) -> CoreResult<Option<Document>>;
    async fn find_by_content_hash(&self, user_id: &str, content_hash: &str) -> CoreResult<Option<Document>>;
    async fn list_documents(
        &self,
        user_id: &str,
        filter: &DocumentFilter,
        page: &Page,
    ) -> CoreResult<Vec<Document>>;
    async fn update_document_fields(
        &self,
        user_id: &str,
        id: &str,
        summary: Option<String>,
        tags: Option<Vec<String>>,
    ) -> CoreResult<()>;
    async fn mark_indexed(&self, user_id: &str, id: &str, state: IndexedState) -> CoreResult<()>;
    /// Synchronous half of delete: transitions the row to `evicting`. The
    /// caller (Ingest Coordinator) submits the background vector-eviction
    /// task and later calls [`MetadataStore::hard_delete_document`].
    async fn begin_delete_document(&self, user_id: &str, id: &str) -> CoreResult<()>;
    async fn hard_delete_document(&self, user_id: &str, id: &str) -> CoreResult<()>;

    async fn upsert_source(&self, source: &Source) -> CoreResult<()>;
    async fn get_source(&self, user_id: &str, id: &str) -> CoreResult<Option<Source>>;
    async fn list_sources(&self, user_id: &str) -> CoreResult<Vec<Source>>;
    /// Cross-user listing used only by the Scheduler to find active sources
    /// of a given kind across every user.
    async fn list_active_sources(&self, kind: Option<SourceKind>) -> CoreResult<Vec<Source>>;
    async fn delete_source(&self, user_id: &str, id: &str) -> CoreResult<()>;
    async fn touch_source(&self, id: &str, at: i64, err: Option<String>) -> CoreResult<()>;

    async fn add_search_record(&self, user_id: &str, query: &str, result_count: i64, elapsed_ms: i64) -> CoreResult<()>;
    async fn top_tags(&self, user_id: &str, n: i64) -> CoreResult<Vec<TagCount>>;
    async fn trending_queries(&self, user_id: &str, window_secs: i64, n: i64) -> CoreResult<Vec<TrendingQuery>>;
}

pub mod memory;
