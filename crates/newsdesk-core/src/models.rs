//! Domain entities: users, documents, sources, tags, search history, and the
//! derived (never relationally persisted) chunk.

use serde::{Deserialize, Serialize};

/// How a Document entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rss,
    Web,
    Upload,
    Manual,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Rss => "rss",
            SourceType::Web => "web",
            SourceType::Upload => "upload",
            SourceType::Manual => "manual",
        }
    }
}

/// Document lifecycle state. See the state machine: `pending -> indexed |
/// failed`, `indexed -> evicting -> (row removed)`, `failed -> pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexedState {
    Pending,
    Indexed,
    Failed,
    Evicting,
}

impl IndexedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexedState::Pending => "pending",
            IndexedState::Indexed => "indexed",
            IndexedState::Failed => "failed",
            IndexedState::Evicting => "evicting",
        }
    }

    /// Whether `self -> next` is a permitted transition.
    pub fn can_transition_to(&self, next: IndexedState) -> bool {
        use IndexedState::*;
        matches!(
            (self, next),
            (Pending, Indexed) | (Pending, Failed) | (Indexed, Evicting) | (Failed, Pending)
        )
    }
}

/// A Source's fetch mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Web,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Web => "web",
        }
    }
}

/// Source health, per the `active <-> paused` / soft `error` state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceHealth {
    Active,
    Paused,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub login_handle: String,
    pub display_name: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub source_url: Option<String>,
    pub source_type: SourceType,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub content_hash: String,
    pub indexed_state: IndexedState,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub url: String,
    pub kind: SourceKind,
    pub cadence_seconds: i64,
    pub active: bool,
    pub health: SourceHealth,
    pub last_fetched_at: Option<i64>,
    pub last_error: Option<String>,
    pub auto_tags: Vec<String>,
    pub consecutive_failures: i64,
}

/// Fold a tag to its canonical storage form: case-folded, trimmed.
pub fn canonical_tag(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: String,
    pub user_id: String,
    pub query: String,
    pub result_count: i64,
    pub elapsed_ms: i64,
    pub created_at: i64,
}

/// A sub-text of a Document, the unit of embedding and ANN storage. Never
/// written to the relational store directly; lives in the per-user vector
/// index and its sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub user_id: String,
    pub ordinal: usize,
    pub text: String,
}

impl Chunk {
    pub fn compute_id(document_id: &str, ordinal: usize) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(b":");
        hasher.update(ordinal.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Collapse whitespace runs to a single space and lowercase, per the
/// Deduper's `content_hash` normalization rule.
pub fn normalize_content(content: &str) -> String {
    let mut normalized = String::with_capacity(content.len());
    let mut last_was_space = false;
    for ch in content.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                normalized.push(' ');
                last_was_space = true;
            }
        } else {
            normalized.extend(ch.to_lowercase());
            last_was_space = false;
        }
    }
    normalized.trim().to_string()
}

pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let normalized = normalize_content(content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_content("  Hello\n\nWorld  "), "hello world");
    }

    #[test]
    fn content_hash_is_stable_under_whitespace_changes() {
        assert_eq!(content_hash("Hello   World"), content_hash("hello\nworld"));
    }

    #[test]
    fn chunk_id_is_deterministic() {
        assert_eq!(Chunk::compute_id("doc-1", 0), Chunk::compute_id("doc-1", 0));
        assert_ne!(Chunk::compute_id("doc-1", 0), Chunk::compute_id("doc-1", 1));
    }

    #[test]
    fn indexed_state_transitions_match_state_machine() {
        assert!(IndexedState::Pending.can_transition_to(IndexedState::Indexed));
        assert!(IndexedState::Pending.can_transition_to(IndexedState::Failed));
        assert!(IndexedState::Failed.can_transition_to(IndexedState::Pending));
        assert!(IndexedState::Indexed.can_transition_to(IndexedState::Evicting));
        assert!(!IndexedState::Evicting.can_transition_to(IndexedState::Indexed));
        assert!(!IndexedState::Pending.can_transition_to(IndexedState::Evicting));
    }
}
