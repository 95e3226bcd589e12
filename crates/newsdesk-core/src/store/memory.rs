//! In-memory [`MetadataStore`] used by unit tests and as a reference
//! implementation of the store contract.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::{CoreError, CoreResult};
use crate::models::{canonical_tag, Document, IndexedState, Source, SourceKind, User};
use crate::store::{DocumentFilter, MetadataStore, Page, TagCount, TrendingQuery};

#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, User>>,
    documents: RwLock<HashMap<String, Document>>,
    sources: RwLock<HashMap<String, Source>>,
    search_records: RwLock<Vec<(String, String, i64, i64, i64)>>, // user, query, count, elapsed_ms, created_at
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn create_user(&self, user: &User) -> CoreResult<()> {
        let mut users = self.users.write().unwrap();
        if users.contains_key(&user.id) {
            return Err(CoreError::duplicate(format!("user {} already exists", user.id)));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &str) -> CoreResult<Option<User>> {
        Ok(self.users.read().unwrap().get(id).cloned())
    }

    async fn put_document(&self, doc: &Document) -> CoreResult<()> {
        let mut documents = self.documents.write().unwrap();

        if let Some(url) = &doc.source_url {
            let collision = documents.values().any(|d| {
                d.user_id == doc.user_id && d.id != doc.id && d.source_url.as_deref() == Some(url.as_str())
            });
            if collision {
                return Err(CoreError::duplicate(format!("source_url already ingested: {url}")));
            }
        }
        let hash_collision = documents
            .values()
            .any(|d| d.user_id == doc.user_id && d.id != doc.id && d.content_hash == doc.content_hash);
        if hash_collision {
            return Err(CoreError::duplicate(format!("content_hash already ingested: {}", doc.content_hash)));
        }

        documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, user_id: &str, id: &str) -> CoreResult<Option<Document>> {
        let documents = self.documents.read().unwrap();
        Ok(documents.get(id).filter(|d| d.user_id == user_id).cloned())
    }

    async fn find_by_source_url(&self, user_id: &str, source_url: &str) -> CoreResult<Option<Document>> {
        let documents = self.documents.read().unwrap();
        Ok(documents
            .values()
            .find(|d| d.user_id == user_id && d.source_url.as_deref() == Some(source_url))
            .cloned())
    }

    async fn find_by_content_hash(&self, user_id: &str, content_hash: &str) -> CoreResult<Option<Document>> {
        let documents = self.documents.read().unwrap();
        Ok(documents
            .values()
            .find(|d| d.user_id == user_id && d.content_hash == content_hash)
            .cloned())
    }

    async fn list_documents(
        &self,
        user_id: &str,
        filter: &DocumentFilter,
        page: &Page,
    ) -> CoreResult<Vec<Document>> {
        let documents = self.documents.read().unwrap();
        let mut matching: Vec<Document> = documents
            .values()
            .filter(|d| d.user_id == user_id)
            .filter(|d| {
                filter
                    .source_type
                    .as_ref()
                    .map(|st| d.source_type.as_str() == st)
                    .unwrap_or(true)
            })
            .filter(|d| filter.date_from.map(|f| d.created_at >= f).unwrap_or(true))
            .filter(|d| filter.date_to.map(|t| d.created_at <= t).unwrap_or(true))
            .filter(|d| {
                filter.tags_any.is_empty()
                    || filter.tags_any.iter().any(|t| d.tags.contains(&canonical_tag(t)))
            })
            .filter(|d| {
                filter
                    .text_like
                    .as_ref()
                    .map(|needle| {
                        d.title.to_lowercase().contains(&needle.to_lowercase())
                            || d.content.to_lowercase().contains(&needle.to_lowercase())
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let start = page.offset.max(0) as usize;
        let end = start.saturating_add(page.limit.max(0) as usize);
        Ok(matching.into_iter().skip(start).take(end.saturating_sub(start)).collect())
    }

    async fn update_document_fields(
        &self,
        user_id: &str,
        id: &str,
        summary: Option<String>,
        tags: Option<Vec<String>>,
    ) -> CoreResult<()> {
        let mut documents = self.documents.write().unwrap();
        let doc = documents
            .get_mut(id)
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
        if let Some(s) = summary {
            doc.summary = Some(s);
        }
        if let Some(t) = tags {
            doc.tags = t.into_iter().map(|tag| canonical_tag(&tag)).collect();
        }
        Ok(())
    }

    async fn mark_indexed(&self, user_id: &str, id: &str, state: IndexedState) -> CoreResult<()> {
        let mut documents = self.documents.write().unwrap();
        let doc = documents
            .get_mut(id)
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| CoreError::not_found(format!("document {id}")))?;
        if !doc.indexed_state.can_transition_to(state) {
            return Err(CoreError::validation(format!(
                "illegal document transition {:?} -> {:?}",
                doc.indexed_state, state
            )));
        }
        doc.indexed_state = state;
        Ok(())
    }

    async fn begin_delete_document(&self, user_id: &str, id: &str) -> CoreResult<()> {
        self.mark_indexed(user_id, id, IndexedState::Evicting).await
    }

    async fn hard_delete_document(&self, user_id: &str, id: &str) -> CoreResult<()> {
        let mut documents = self.documents.write().unwrap();
        match documents.get(id) {
            Some(d) if d.user_id == user_id => {
                documents.remove(id);
                Ok(())
            }
            Some(_) => Err(CoreError::CrossUserForbidden { user_id: user_id.to_string() }),
            None => Err(CoreError::not_found(format!("document {id}"))),
        }
    }

    async fn upsert_source(&self, source: &Source) -> CoreResult<()> {
        self.sources.write().unwrap().insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn get_source(&self, user_id: &str, id: &str) -> CoreResult<Option<Source>> {
        Ok(self.sources.read().unwrap().get(id).filter(|s| s.user_id == user_id).cloned())
    }

    async fn list_sources(&self, user_id: &str) -> CoreResult<Vec<Source>> {
        Ok(self.sources.read().unwrap().values().filter(|s| s.user_id == user_id).cloned().collect())
    }

    async fn list_active_sources(&self, kind: Option<SourceKind>) -> CoreResult<Vec<Source>> {
        Ok(self
            .sources
            .read()
            .unwrap()
            .values()
            .filter(|s| s.active)
            .filter(|s| kind.map(|k| s.kind == k).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn delete_source(&self, user_id: &str, id: &str) -> CoreResult<()> {
        let mut sources = self.sources.write().unwrap();
        match sources.get(id) {
            Some(s) if s.user_id == user_id => {
                sources.remove(id);
                Ok(())
            }
            Some(_) => Err(CoreError::CrossUserForbidden { user_id: user_id.to_string() }),
            None => Err(CoreError::not_found(format!("source {id}"))),
        }
    }

    async fn touch_source(&self, id: &str, at: i64, err: Option<String>) -> CoreResult<()> {
        let mut sources = self.sources.write().unwrap();
        let source = sources.get_mut(id).ok_or_else(|| CoreError::not_found(format!("source {id}")))?;
        // last_fetched_at is monotonic non-decreasing per successful poll.
        if err.is_none() {
            source.last_fetched_at = Some(source.last_fetched_at.map(|prev| prev.max(at)).unwrap_or(at));
            source.consecutive_failures = 0;
        } else {
            source.consecutive_failures += 1;
        }
        source.last_error = err;
        Ok(())
    }

    async fn add_search_record(&self, user_id: &str, query: &str, result_count: i64, elapsed_ms: i64) -> CoreResult<()> {
        let created_at = chrono::Utc::now().timestamp();
        self.search_records.write().unwrap().push((
            user_id.to_string(),
            query.to_string(),
            result_count,
            elapsed_ms,
            created_at,
        ));
        Ok(())
    }

    async fn top_tags(&self, user_id: &str, n: i64) -> CoreResult<Vec<TagCount>> {
        let documents = self.documents.read().unwrap();
        let mut counts: HashMap<String, i64> = HashMap::new();
        let mut total = 0i64;
        for doc in documents.values().filter(|d| d.user_id == user_id) {
            for tag in &doc.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
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
        let now = chrono::Utc::now().timestamp();
        let records = self.search_records.read().unwrap();
        let mut by_query: HashMap<String, (i64, i64)> = HashMap::new(); // query -> (count, total_elapsed)
        for (uid, query, _result_count, elapsed_ms, created_at) in records.iter() {
            if uid != user_id {
                continue;
            }
            if now - created_at > window_secs {
                continue;
            }
            let entry = by_query.entry(query.clone()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += elapsed_ms;
        }
        let mut items: Vec<TrendingQuery> = by_query
            .into_iter()
            .map(|(query, (count, total_elapsed))| TrendingQuery {
                query,
                count,
                avg_elapsed_ms: total_elapsed as f64 / count.max(1) as f64,
            })
            .collect();
        items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.query.cmp(&b.query)));
        items.truncate(n.max(0) as usize);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, user: &str, url: Option<&str>, hash: &str) -> Document {
        Document {
            id: id.to_string(),
            user_id: user.to_string(),
            title: "t".into(),
            content: "c".into(),
            summary: None,
            source_url: url.map(|s| s.to_string()),
            source_type: crate::models::SourceType::Manual,
            published_at: None,
            created_at: 1,
            updated_at: 1,
            content_hash: hash.to_string(),
            indexed_state: IndexedState::Pending,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn duplicate_source_url_is_rejected() {
        let store = InMemoryStore::new();
        store.put_document(&doc("d1", "u1", Some("https://x"), "h1")).await.unwrap();
        let err = store.put_document(&doc("d2", "u1", Some("https://x"), "h2")).await.unwrap_err();
        assert_eq!(err.code(), "duplicate");
    }

    #[tokio::test]
    async fn duplicate_content_hash_is_rejected() {
        let store = InMemoryStore::new();
        store.put_document(&doc("d1", "u1", None, "same")).await.unwrap();
        let err = store.put_document(&doc("d2", "u1", None, "same")).await.unwrap_err();
        assert_eq!(err.code(), "duplicate");
    }

    #[tokio::test]
    async fn cross_user_documents_do_not_collide() {
        let store = InMemoryStore::new();
        store.put_document(&doc("d1", "u1", Some("https://x"), "h1")).await.unwrap();
        store.put_document(&doc("d2", "u2", Some("https://x"), "h2")).await.unwrap();
    }

    #[tokio::test]
    async fn illegal_state_transition_is_rejected() {
        let store = InMemoryStore::new();
        store.put_document(&doc("d1", "u1", None, "h1")).await.unwrap();
        let err = store.mark_indexed("u1", "d1", IndexedState::Evicting).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn hard_delete_is_scoped_to_owning_user() {
        let store = InMemoryStore::new();
        store.put_document(&doc("d1", "u1", None, "h1")).await.unwrap();
        let err = store.hard_delete_document("u2", "d1").await.unwrap_err();
        assert_eq!(err.code(), "cross_user_forbidden");
    }
}
