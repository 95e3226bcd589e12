//! Staged semantic search: embed the query, brute-force vector search,
//! cross-encoder rerank, calibrate, fall back to external search if the
//! corpus came up thin, and optionally summarize — emitting a progress
//! event at each stage transition.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use newsdesk_core::embedding::Embedder;
use newsdesk_core::errors::{CoreError, CoreResult};
use newsdesk_core::reranker::{calibrate, Reranker};
use newsdesk_core::store::MetadataStore;
use tracing::warn;

use crate::config::SearchConfig;
use crate::llm_client::LlmClient;
use crate::progress::{ProgressSink, SearchProgressEvent};
use crate::vector_store::VectorStoreManager;
use crate::web_fallback::{ExternalHit, ExternalSearchProvider};

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub document_id: String,
    pub title: String,
    pub snippet: String,
    pub similarity: f32,
    pub rerank_score: f64,
    pub calibrated_score: f64,
    pub published_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub external: Vec<ExternalHit>,
    pub used_external: bool,
    pub summary: Option<String>,
    pub elapsed_ms: i64,
}

#[derive(Clone)]
struct Candidate {
    document_id: String,
    ordinal: usize,
    similarity: f32,
    rerank_score: f64,
}

pub struct RetrievalPipeline {
    store: Arc<dyn MetadataStore>,
    vectors: Arc<VectorStoreManager>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    external: Option<Arc<dyn ExternalSearchProvider>>,
    llm: Option<Arc<LlmClient>>,
    config: SearchConfig,
}

impl RetrievalPipeline {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        vectors: Arc<VectorStoreManager>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        external: Option<Arc<dyn ExternalSearchProvider>>,
        llm: Option<Arc<LlmClient>>,
        config: SearchConfig,
    ) -> Self {
        Self { store, vectors, embedder, reranker, external, llm, config }
    }

    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<i64>,
        include_external: bool,
        summarize: bool,
        progress: &ProgressSink<SearchProgressEvent>,
    ) -> CoreResult<SearchOutcome> {
        let started_at = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            let err = CoreError::validation("query must not be empty");
            progress.emit(SearchProgressEvent::Error { code: err.code().to_string(), message: err.to_string() }).await;
            return Err(err);
        }
        let limit = limit.unwrap_or(self.config.default_limit).clamp(1, 100) as usize;

        progress.emit(SearchProgressEvent::Started { query: query.to_string() }).await;

        progress.emit(SearchProgressEvent::Progress { stage: "embedding".to_string() }).await;
        let query_vec = self.embedder.embed(query);

        progress.emit(SearchProgressEvent::Progress { stage: "searching".to_string() }).await;
        let candidate_k = (limit * 4).max(20);
        let chunk_hits = match self.vectors.search(user_id, &query_vec, candidate_k).await {
            Ok(hits) => hits,
            Err(e) => {
                progress.emit(SearchProgressEvent::Error { code: e.code().to_string(), message: e.to_string() }).await;
                return Err(e);
            }
        };

        progress.emit(SearchProgressEvent::Progress { stage: "reranking".to_string() }).await;
        let passages: Vec<String> = chunk_hits.iter().map(|h| h.text_preview.clone()).collect();
        let rerank_scores = if passages.is_empty() { Vec::new() } else { self.reranker.rerank(query, &passages) };

        progress.emit(SearchProgressEvent::Progress { stage: "calibrating".to_string() }).await;
        let (s_min, s_max) = min_max(&rerank_scores);

        let candidates: Vec<Candidate> = chunk_hits
            .iter()
            .enumerate()
            .map(|(i, h)| Candidate {
                document_id: h.document_id.clone(),
                ordinal: h.ordinal,
                similarity: h.similarity,
                rerank_score: rerank_scores.get(i).copied().unwrap_or(0.0),
            })
            .collect();

        let mut collapsed = collapse_by_document(candidates);
        collapsed.truncate(limit);

        let mut hits = Vec::with_capacity(collapsed.len());
        for candidate in &collapsed {
            let doc = self.store.get_document(user_id, &candidate.document_id).await?;
            let Some(doc) = doc else { continue };
            let calibrated_score = calibrate(candidate.rerank_score, s_min, s_max, 6.0);
            let hit = SearchHit {
                document_id: doc.id.clone(),
                title: doc.title,
                snippet: snippet_of(&doc.content),
                similarity: candidate.similarity,
                rerank_score: candidate.rerank_score,
                calibrated_score,
                published_at: doc.published_at,
            };
            // `calibrated_score` (derived from `rerank_score`, which
            // `collapsed` is sorted by) is monotonic non-increasing along
            // this loop by construction — `hit.similarity` is the raw
            // vector-distance similarity from before reranking and is not,
            // so it is not safe to report here (spec.md §8 testable
            // property #4).
            progress
                .emit(SearchProgressEvent::ResultPartial {
                    document_id: hit.document_id.clone(),
                    title: hit.title.clone(),
                    similarity: hit.calibrated_score as f32,
                })
                .await;
            hits.push(hit);
        }

        let top_similarity = hits.first().map(|h| h.similarity).unwrap_or(0.0);
        let should_try_external =
            include_external && (top_similarity < self.config.external_trigger_threshold as f32 || (hits.len() as i64) < self.config.external_trigger_min_results);

        let mut external = Vec::new();
        let mut used_external = false;
        if should_try_external {
            if let Some(provider) = &self.external {
                progress.emit(SearchProgressEvent::Progress { stage: "external".to_string() }).await;
                match provider.search(query).await {
                    Ok(results) => {
                        used_external = !results.is_empty();
                        external = results;
                    }
                    Err(e) => {
                        warn!(error = %e, "external search fallback failed");
                        progress.emit(SearchProgressEvent::ExternalUnavailable { reason: e.to_string() }).await;
                    }
                }
            }
        }

        let mut summary = None;
        if summarize {
            if let Some(llm) = &self.llm {
                progress.emit(SearchProgressEvent::Progress { stage: "summarizing".to_string() }).await;
                let prompt = build_summary_prompt(query, &hits, &external);
                summary = Some(self.stream_or_collect_summary(llm, prompt, progress).await);
                progress.emit(SearchProgressEvent::SummaryEnd).await;
            }
        }

        let elapsed_ms = started_at.elapsed().as_millis() as i64;
        self.store.add_search_record(user_id, query, hits.len() as i64, elapsed_ms).await?;

        progress
            .emit(SearchProgressEvent::Completed { result_count: hits.len(), elapsed_ms, used_external })
            .await;

        Ok(SearchOutcome { hits, external, used_external, summary, elapsed_ms })
    }

    /// Streams tokens onto the progress channel if one is attached (the
    /// `/stream` endpoint); otherwise collects the whole summary in one
    /// blocking call for the plain JSON endpoint.
    async fn stream_or_collect_summary(
        &self,
        llm: &Arc<LlmClient>,
        prompt: String,
        progress: &ProgressSink<SearchProgressEvent>,
    ) -> String {
        if progress.is_active() {
            let mut rx = llm.generate_stream(prompt);
            let mut full = String::new();
            while let Some(next) = rx.recv().await {
                match next {
                    Ok(token) => {
                        full.push_str(&token);
                        progress.emit(SearchProgressEvent::SummaryToken { token }).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "summary generation failed mid-stream");
                        break;
                    }
                }
            }
            full
        } else {
            llm.generate(&prompt).await.unwrap_or_else(|e| {
                warn!(error = %e, "summary generation failed");
                String::new()
            })
        }
    }
}

fn collapse_by_document(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut by_doc: HashMap<String, Candidate> = HashMap::new();
    for candidate in candidates {
        by_doc
            .entry(candidate.document_id.clone())
            .and_modify(|existing| {
                let better = candidate.rerank_score > existing.rerank_score
                    || (candidate.rerank_score == existing.rerank_score && candidate.ordinal < existing.ordinal);
                if better {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }
    let mut collapsed: Vec<Candidate> = by_doc.into_values().collect();
    collapsed.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });
    collapsed
}

fn min_max(scores: &[f64]) -> (f64, f64) {
    if scores.is_empty() {
        return (0.0, 1.0);
    }
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

fn snippet_of(content: &str) -> String {
    const MAX_SNIPPET_CHARS: usize = 280;
    content.chars().take(MAX_SNIPPET_CHARS).collect()
}

fn build_summary_prompt(query: &str, hits: &[SearchHit], external: &[ExternalHit]) -> String {
    let mut prompt = format!("Summarize the following search results for the query \"{query}\":\n\n");
    for (i, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!("{}. {} — {}\n", i + 1, hit.title, hit.snippet));
    }
    for (i, hit) in external.iter().enumerate() {
        prompt.push_str(&format!("{}. [external] {} — {}\n", hits.len() + i + 1, hit.title, hit.snippet));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(doc: &str, ordinal: usize, score: f64) -> Candidate {
        Candidate { document_id: doc.to_string(), ordinal, similarity: 0.5, rerank_score: score }
    }

    #[test]
    fn collapse_keeps_highest_scoring_chunk_per_document() {
        let candidates = vec![candidate("d1", 0, 0.2), candidate("d1", 1, 0.9), candidate("d2", 0, 0.5)];
        let collapsed = collapse_by_document(candidates);
        assert_eq!(collapsed.len(), 2);
        let d1 = collapsed.iter().find(|c| c.document_id == "d1").unwrap();
        assert_eq!(d1.ordinal, 1);
    }

    #[test]
    fn collapse_tie_breaks_on_earlier_ordinal() {
        let candidates = vec![candidate("d1", 2, 0.5), candidate("d1", 0, 0.5)];
        let collapsed = collapse_by_document(candidates);
        assert_eq!(collapsed[0].ordinal, 0);
    }

    #[test]
    fn min_max_of_empty_scores_is_a_safe_default_range() {
        assert_eq!(min_max(&[]), (0.0, 1.0));
    }
}
