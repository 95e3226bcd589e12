//! Rejects duplicate `(user, source_url)` or content-hash collisions before
//! a Document is ever inserted.

use newsdesk_core::errors::CoreResult;
use newsdesk_core::store::MetadataStore;

pub struct Deduper;

impl Deduper {
    /// Two lookups: `(user, source_url)` if non-null, and `(user,
    /// content_hash)`. Either hit counts as a duplicate.
    pub async fn is_duplicate(
        store: &dyn MetadataStore,
        user_id: &str,
        source_url: Option<&str>,
        content_hash: &str,
    ) -> CoreResult<bool> {
        if let Some(url) = source_url {
            if store.find_by_source_url(user_id, url).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(store.find_by_content_hash(user_id, content_hash).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsdesk_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn no_hits_means_not_a_duplicate() {
        let store = InMemoryStore::new();
        assert!(!Deduper::is_duplicate(&store, "u1", Some("https://x"), "h1").await.unwrap());
    }
}
