//! SQLite-backed [`MetadataStore`]. Maps each trait method onto the schema
//! created by `migrate.rs`, the same one-file-per-concern shape the
//! teacher's `sqlite_store.rs` uses for its `Store` trait.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use newsdesk_core::errors::{CoreError, CoreResult};
use newsdesk_core::models::{
    canonical_tag, Document, IndexedState, Source, SourceHealth, SourceKind, SourceType, User,
};
use newsdesk_core::store::{DocumentFilter, MetadataStore, Page, TagCount, TrendingQuery};

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn storage_err(e: sqlx::Error) -> CoreError {
    CoreError::storage(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn parse_source_type(s: &str) -> SourceType {
    match s {
        "rss" => SourceType::Rss,
        "web" => SourceType::Web,
        "upload" => SourceType::Upload,
        _ => SourceType::Manual,
    }
}

fn parse_indexed_state(s: &str) -> IndexedState {
    match s {
        "indexed" => IndexedState::Indexed,
        "failed" => IndexedState::Failed,
        "evicting" => IndexedState::Evicting,
        _ => IndexedState::Pending,
    }
}

fn parse_source_kind(s: &str) -> SourceKind {
    match s {
        "web" => SourceKind::Web,
        _ => SourceKind::Rss,
    }
}

fn parse_source_health(s: &str) -> SourceHealth {
    match s {
        "paused" => SourceHealth::Paused,
        "error" => SourceHealth::Error,
        _ => SourceHealth::Active,
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    let tags_json: String = row.get("tags_json");
    Document {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        content: row.get("content"),
        summary: row.get("summary"),
        source_url: row.get("source_url"),
        source_type: parse_source_type(row.get::<String, _>("source_type").as_str()),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        content_hash: row.get("content_hash"),
        indexed_state: parse_indexed_state(row.get::<String, _>("indexed_state").as_str()),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    }
}

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Source {
    let auto_tags_json: String = row.get("auto_tags_json");
    Source {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        url: row.get("url"),
        kind: parse_source_kind(row.get::<String, _>("kind").as_str()),
        cadence_seconds: row.get("cadence_seconds"),
        active: row.get::<i64, _>("active") != 0,
        health: parse_source_health(row.get::<String, _>("health").as_str()),
        last_fetched_at: row.get("last_fetched_at"),
        last_error: row.get("last_error"),
        auto_tags: serde_json::from_str(&auto_tags_json).unwrap_or_default(),
        consecutive_failures: row.get("consecutive_failures"),
    }
}

const DOCUMENT_COLUMNS: &str = "id, user_id, title, content, summary, source_url, source_type, \
     published_at, created_at, updated_at, content_hash, indexed_state, tags_json";

const SOURCE_COLUMNS: &str = "id, user_id, name, url, kind, cadence_seconds, active, health, \
     last_fetched_at, last_error, auto_tags_json, consecutive_failures";

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create_user(&self, user: &User) -> CoreResult<()> {
        sqlx::query("INSERT INTO users (id, login_handle, display_name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.login_handle)
            .bind(&user.display_name)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CoreError::duplicate(format!("login handle {} already registered", user.login_handle))
                } else {
                    storage_err(e)
                }
            })?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> CoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, login_handle, display_name, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| User {
            id: r.get("id"),
            login_handle: r.get("login_handle"),
            display_name: r.get("display_name"),
            created_at: r.get("created_at"),
        }))
    }

    async fn put_document(&self, doc: &Document) -> CoreResult<()> {
        let tags_json = serde_json::to_string(&doc.tags).unwrap_or_else(|_| "[]".to_string());
        let query = format!("INSERT INTO documents ({DOCUMENT_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)");
        sqlx::query(&query)
            .bind(&doc.id)
            .bind(&doc.user_id)
            .bind(&doc.title)
            .bind(&doc.content)
            .bind(&doc.summary)
            .bind(&doc.source_url)
            .bind(doc.source_type.as_str())
            .bind(doc.published_at)
            .bind(doc.created_at)
            .bind(doc.updated_at)
            .bind(&doc.content_hash)
            .bind(doc.indexed_state.as_str())
            .bind(&tags_json)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CoreError::duplicate("document already ingested for this user".to_string())
                } else {
                    storage_err(e)
                }
            })?;
        Ok(())
    }

    async fn get_document(&self, user_id: &str, id: &str) -> CoreResult<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ? AND user_id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn find_by_source_url(&self, user_id: &str, source_url: &str) -> CoreResult<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = ? AND source_url = ?");
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(source_url)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn find_by_content_hash(&self, user_id: &str, content_hash: &str) -> CoreResult<Option<Document>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = ? AND content_hash = ?");
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn list_documents(
        &self,
        user_id: &str,
        filter: &DocumentFilter,
        page: &Page,
    ) -> CoreResult<Vec<Document>> {
        let mut sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = ?");
        if filter.source_type.is_some() {
            sql.push_str(" AND source_type = ?");
        }
        if filter.date_from.is_some() {
            sql.push_str(" AND created_at >= ?");
        }
        if filter.date_to.is_some() {
            sql.push_str(" AND created_at <= ?");
        }
        if filter.text_like.is_some() {
            sql.push_str(" AND (title LIKE ? OR content LIKE ?)");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql).bind(user_id);
        if let Some(st) = &filter.source_type {
            q = q.bind(st);
        }
        if let Some(from) = filter.date_from {
            q = q.bind(from);
        }
        if let Some(to) = filter.date_to {
            q = q.bind(to);
        }
        if let Some(text) = &filter.text_like {
            let pat = format!("%{text}%");
            q = q.bind(pat.clone()).bind(pat);
        }
        q = q.bind(page.limit.max(0)).bind(page.offset.max(0));

        let rows = q.fetch_all(&self.pool).await.map_err(storage_err)?;
        let mut docs: Vec<Document> = rows.iter().map(row_to_document).collect();

        if !filter.tags_any.is_empty() {
            let wanted: Vec<String> = filter.tags_any.iter().map(|t| canonical_tag(t)).collect();
            docs.retain(|d| wanted.iter().any(|t| d.tags.contains(t)));
        }

        Ok(docs)
    }

    async fn update_document_fields(
        &self,
        user_id: &str,
        id: &str,
        summary: Option<String>,
        tags: Option<Vec<String>>,
    ) -> CoreResult<()> {
        let existing = self
            .get_document(user_id, id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("document {id}")))?;

        let new_summary = summary.or(existing.summary);
        let new_tags = tags
            .map(|t| {
                let mut canon: Vec<String> = t.into_iter().map(|tag| canonical_tag(&tag)).collect();
                canon.sort();
                canon.dedup();
                canon
            })
            .unwrap_or(existing.tags);
        let tags_json = serde_json::to_string(&new_tags).unwrap_or_else(|_| "[]".to_string());

        sqlx::query("UPDATE documents SET summary = ?, tags_json = ?, updated_at = ? WHERE id = ? AND user_id = ?")
            .bind(&new_summary)
            .bind(&tags_json)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn mark_indexed(&self, user_id: &str, id: &str, state: IndexedState) -> CoreResult<()> {
        let existing = self
            .get_document(user_id, id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
        if !existing.indexed_state.can_transition_to(state) {
            return Err(CoreError::validation(format!(
                "illegal document transition {:?} -> {state:?}",
                existing.indexed_state
            )));
        }
        sqlx::query("UPDATE documents SET indexed_state = ?, updated_at = ? WHERE id = ? AND user_id = ?")
            .bind(state.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn begin_delete_document(&self, user_id: &str, id: &str) -> CoreResult<()> {
        self.mark_indexed(user_id, id, IndexedState::Evicting).await
    }

    async fn hard_delete_document(&self, user_id: &str, id: &str) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("document {id}")));
        }
        Ok(())
    }

    async fn upsert_source(&self, source: &Source) -> CoreResult<()> {
        let auto_tags_json = serde_json::to_string(&source.auto_tags).unwrap_or_else(|_| "[]".to_string());
        let query = format!(
            "INSERT INTO sources ({SOURCE_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?,?,?) \
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, url=excluded.url, kind=excluded.kind, \
             cadence_seconds=excluded.cadence_seconds, active=excluded.active, health=excluded.health, \
             auto_tags_json=excluded.auto_tags_json"
        );
        sqlx::query(&query)
            .bind(&source.id)
            .bind(&source.user_id)
            .bind(&source.name)
            .bind(&source.url)
            .bind(source.kind.as_str())
            .bind(source.cadence_seconds)
            .bind(source.active as i64)
            .bind(match source.health {
                SourceHealth::Active => "active",
                SourceHealth::Paused => "paused",
                SourceHealth::Error => "error",
            })
            .bind(source.last_fetched_at)
            .bind(&source.last_error)
            .bind(&auto_tags_json)
            .bind(source.consecutive_failures)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn get_source(&self, user_id: &str, id: &str) -> CoreResult<Option<Source>> {
        let query = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ? AND user_id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(row_to_source))
    }

    async fn list_sources(&self, user_id: &str) -> CoreResult<Vec<Source>> {
        let query = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE user_id = ?");
        let rows = sqlx::query(&query).bind(user_id).fetch_all(&self.pool).await.map_err(storage_err)?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    async fn list_active_sources(&self, kind: Option<SourceKind>) -> CoreResult<Vec<Source>> {
        let rows = if let Some(k) = kind {
            let query = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE active = 1 AND kind = ?");
            sqlx::query(&query).bind(k.as_str()).fetch_all(&self.pool).await
        } else {
            let query = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE active = 1");
            sqlx::query(&query).fetch_all(&self.pool).await
        }
        .map_err(storage_err)?;
        Ok(rows.iter().map(row_to_source).collect())
    }

    async fn delete_source(&self, user_id: &str, id: &str) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("source {id}")));
        }
        Ok(())
    }

    async fn touch_source(&self, id: &str, at: i64, err: Option<String>) -> CoreResult<()> {
        if err.is_none() {
            sqlx::query(
                "UPDATE sources SET last_fetched_at = MAX(COALESCE(last_fetched_at, 0), ?), \
                 consecutive_failures = 0, last_error = NULL, health = 'active' WHERE id = ?",
            )
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        } else {
            sqlx::query(
                "UPDATE sources SET consecutive_failures = consecutive_failures + 1, last_error = ?, \
                 health = CASE WHEN consecutive_failures + 1 >= 3 THEN 'error' ELSE health END WHERE id = ?",
            )
            .bind(&err)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    async fn add_search_record(&self, user_id: &str, query: &str, result_count: i64, elapsed_ms: i64) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO search_records (id, user_id, query, result_count, elapsed_ms, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(query)
        .bind(result_count)
        .bind(elapsed_ms)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn top_tags(&self, user_id: &str, n: i64) -> CoreResult<Vec<TagCount>> {
        let rows = sqlx::query("SELECT tags_json FROM documents WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut counts = std::collections::HashMap::new();
        let mut total = 0i64;
        for row in rows {
            let tags_json: String = row.get("tags_json");
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            for tag in tags {
                *counts.entry(tag).or_insert(0i64) += 1;
                total += 1;
            }
        }

        let mut items: Vec<TagCount> = counts
            .into_iter()
            .map(|(name, count)| TagCount {
                name,
                count,
                percentage: if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 },
            })
            .collect();
        items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        items.truncate(n.max(0) as usize);
        Ok(items)
    }

    async fn trending_queries(&self, user_id: &str, window_secs: i64, n: i64) -> CoreResult<Vec<TrendingQuery>> {
        let since = chrono::Utc::now().timestamp() - window_secs;
        let rows = sqlx::query(
            "SELECT query, COUNT(*) as cnt, AVG(elapsed_ms) as avg_ms FROM search_records \
             WHERE user_id = ? AND created_at >= ? GROUP BY query ORDER BY cnt DESC, query ASC LIMIT ?",
        )
        .bind(user_id)
        .bind(since)
        .bind(n.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .iter()
            .map(|r| TrendingQuery {
                query: r.get("query"),
                count: r.get("cnt"),
                avg_elapsed_ms: r.get::<f64, _>("avg_ms"),
            })
            .collect())
    }
}
