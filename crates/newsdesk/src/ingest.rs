//! Ties acquisition, deduplication, and indexing together. Every way a
//! Document enters the system — manual entry, upload row, RSS poll, web
//! sweep — funnels through [`IngestCoordinator::ingest_document`], and
//! every way one leaves funnels through [`IngestCoordinator::delete_document`].
//!
//! Also implements [`TaskHandler`] so the same struct both triggers and runs
//! the background side effects it schedules.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use newsdesk_core::embedding::Embedder;
use newsdesk_core::errors::{CoreError, CoreResult};
use newsdesk_core::models::{canonical_tag, content_hash, Chunk, Document, IndexedState, SourceKind, SourceType};
use newsdesk_core::store::MetadataStore;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

use crate::executor::{Executor, Task, TaskHandler};
use crate::fetcher::Fetcher;
use crate::rss_crawler::{Article, RssCrawler};
use crate::scheduler::SchedulerJob;
use crate::vector_store::VectorStoreManager;
use crate::web_scraper::WebScraper;

pub struct IngestCoordinator {
    store: Arc<dyn MetadataStore>,
    vectors: Arc<VectorStoreManager>,
    embedder: Arc<dyn Embedder>,
    fetcher: Arc<Fetcher>,
    per_host_rps: f64,
    executor: OnceCell<Arc<Executor>>,
}

impl IngestCoordinator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        vectors: Arc<VectorStoreManager>,
        embedder: Arc<dyn Embedder>,
        fetcher: Arc<Fetcher>,
        per_host_rps: f64,
    ) -> Arc<Self> {
        Arc::new(Self { store, vectors, embedder, fetcher, per_host_rps, executor: OnceCell::new() })
    }

    /// Must be called once, after the executor is spawned with this
    /// coordinator as its handler, before any ingest call runs.
    pub fn attach_executor(&self, executor: Arc<Executor>) {
        let _ = self.executor.set(executor);
    }

    fn executor(&self) -> &Arc<Executor> {
        self.executor.get().expect("attach_executor must be called before ingest_document")
    }

    /// Validates, normalizes, deduplicates, and inserts a pending Document,
    /// then submits the background indexing task. Returns the pending
    /// Document; the caller does not wait for indexing to finish.
    pub async fn ingest_document(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
        source_url: Option<String>,
        source_type: SourceType,
        published_at: Option<i64>,
        tags: Vec<String>,
    ) -> CoreResult<Document> {
        let title = title.trim();
        let content = content.trim();
        if title.is_empty() {
            return Err(CoreError::validation("title must not be empty"));
        }
        if content.is_empty() {
            return Err(CoreError::validation("content must not be empty"));
        }

        let hash = content_hash(content);
        if crate::dedup::Deduper::is_duplicate(self.store.as_ref(), user_id, source_url.as_deref(), &hash).await? {
            return Err(CoreError::duplicate(format!("document already exists for user {user_id}")));
        }

        let now = Utc::now().timestamp();
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            summary: None,
            source_url,
            source_type,
            published_at,
            created_at: now,
            updated_at: now,
            content_hash: hash,
            indexed_state: IndexedState::Pending,
            tags: tags.into_iter().map(|t| canonical_tag(&t)).collect(),
        };

        self.store.put_document(&doc).await?;
        self.executor().submit(Task::IndexDocument { user_id: user_id.to_string(), document_id: doc.id.clone() })?;
        Ok(doc)
    }

    /// Transitions the Document to `evicting` synchronously (so it
    /// immediately disappears from listings and search), then submits the
    /// background vector-eviction task. The row itself is removed only
    /// after eviction completes.
    pub async fn delete_document(&self, user_id: &str, document_id: &str) -> CoreResult<()> {
        let doc = self
            .store
            .get_document(user_id, document_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("document {document_id}")))?;
        if doc.user_id != user_id {
            return Err(CoreError::CrossUserForbidden { user_id: user_id.to_string() });
        }

        self.store.begin_delete_document(user_id, document_id).await?;
        self.executor().submit(Task::EvictDocumentVectors {
            user_id: user_id.to_string(),
            document_id: document_id.to_string(),
        })?;
        Ok(())
    }

    async fn run_index(&self, user_id: &str, document_id: &str) -> CoreResult<()> {
        let doc = self
            .store
            .get_document(user_id, document_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("document {document_id}")))?;

        let result = self.chunk_embed_and_store(&doc).await;
        match result {
            Ok(()) => {
                self.store.mark_indexed(user_id, document_id, IndexedState::Indexed).await?;
                info!(document_id, "document indexed");
            }
            Err(e) => {
                warn!(document_id, error = %e, "indexing failed, marking document failed");
                self.store.mark_indexed(user_id, document_id, IndexedState::Failed).await?;
            }
        }
        Ok(())
    }

    async fn chunk_embed_and_store(&self, doc: &Document) -> CoreResult<()> {
        let chunks: Vec<Chunk> = newsdesk_core::chunk::chunk_text(&doc.id, &doc.user_id, &doc.content);
        if chunks.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts);
        self.vectors.add(&doc.user_id, &chunks, &vectors).await
    }

    async fn run_evict(&self, user_id: &str, document_id: &str) -> CoreResult<()> {
        self.vectors.remove_by_document(user_id, document_id).await?;
        self.store.hard_delete_document(user_id, document_id).await?;
        info!(document_id, "document evicted and removed");
        Ok(())
    }

    async fn run_scheduler_job(&self, job: SchedulerJob) -> CoreResult<()> {
        match job {
            SchedulerJob::PollRssSource { source_id, user_id } => self.run_rss_poll(&user_id, &source_id).await,
            SchedulerJob::WebSweep => self.run_web_sweep().await,
            SchedulerJob::WeeklyMaintenance => self.run_weekly_maintenance().await,
        }
    }

    async fn run_rss_poll(&self, user_id: &str, source_id: &str) -> CoreResult<()> {
        let Some(source) = self.store.get_source(user_id, source_id).await? else {
            return Ok(());
        };
        let crawler = RssCrawler::new(&self.fetcher, self.per_host_rps);
        let since = source.last_fetched_at.and_then(|t| chrono::DateTime::from_timestamp(t, 0));

        match crawler.poll(&source, since).await {
            Ok(articles) => {
                for article in articles {
                    if let Err(e) = self.ingest_article(user_id, &article, SourceType::Rss, &source.auto_tags).await {
                        if !matches!(&e, CoreError::Duplicate { .. }) {
                            warn!(source_id, error = %e, "failed to ingest rss article");
                        }
                    }
                }
                self.store.touch_source(source_id, Utc::now().timestamp(), None).await?;
            }
            Err(e) => {
                warn!(source_id, error = %e, "rss poll failed");
                self.store.touch_source(source_id, Utc::now().timestamp(), Some(e.to_string())).await?;
            }
        }
        Ok(())
    }

    async fn run_web_sweep(&self) -> CoreResult<()> {
        let sources = self.store.list_active_sources(Some(SourceKind::Web)).await?;
        let scraper = WebScraper::new(&self.fetcher, self.per_host_rps);
        for source in sources {
            match scraper.fetch(&source.url).await {
                Ok(Some(article)) => {
                    if let Err(e) = self.ingest_article(&source.user_id, &article, SourceType::Web, &source.auto_tags).await {
                        if !matches!(&e, CoreError::Duplicate { .. }) {
                            warn!(source_id = %source.id, error = %e, "failed to ingest scraped page");
                        }
                    }
                    self.store.touch_source(&source.id, Utc::now().timestamp(), None).await?;
                }
                Ok(None) => {
                    self.store
                        .touch_source(&source.id, Utc::now().timestamp(), Some("no extractable content".to_string()))
                        .await?;
                }
                Err(e) => {
                    warn!(source_id = %source.id, error = %e, "web sweep fetch failed");
                    self.store.touch_source(&source.id, Utc::now().timestamp(), Some(e.to_string())).await?;
                }
            }
        }
        Ok(())
    }

    /// Sweeps every user's on-disk index, not just the ones currently
    /// resident in the in-memory LRU, so an inactive user (or one evicted
    /// past `lru_capacity`) is never permanently skipped (spec.md §4.11:
    /// "a weekly compaction pass over all vector indices with non-trivial
    /// eviction debt").
    async fn run_weekly_maintenance(&self) -> CoreResult<()> {
        let user_ids = match self.vectors.known_user_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "could not enumerate on-disk vector indices for weekly maintenance");
                return Ok(());
            }
        };
        for user_id in user_ids {
            match self.vectors.eviction_debt_ratio(&user_id).await {
                Ok(ratio) if ratio > 0.0 => {
                    if let Err(e) = self.vectors.compact(&user_id).await {
                        warn!(user_id, error = %e, "weekly compaction failed");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(user_id, error = %e, "could not check eviction debt during weekly maintenance"),
            }
        }
        Ok(())
    }

    async fn ingest_article(
        &self,
        user_id: &str,
        article: &Article,
        source_type: SourceType,
        auto_tags: &[String],
    ) -> CoreResult<Document> {
        self.ingest_document(
            user_id,
            &article.title,
            &article.content,
            Some(article.source_url.clone()),
            source_type,
            article.published_at,
            auto_tags.to_vec(),
        )
        .await
    }
}

#[async_trait]
impl TaskHandler for IngestCoordinator {
    async fn handle(&self, task: Task) -> CoreResult<()> {
        match task {
            Task::IndexDocument { user_id, document_id } => self.run_index(&user_id, &document_id).await,
            Task::EvictDocumentVectors { user_id, document_id } => self.run_evict(&user_id, &document_id).await,
            Task::CompactUserIndex { user_id } => self.vectors.compact(&user_id).await,
            Task::RunSchedulerJob { job } => self.run_scheduler_job(job).await,
        }
    }
}
