//! Cross-encoder scoring of `(query, passage)` pairs, plus the display-only
//! calibration curve the retrieval pipeline applies to raw scores.

pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Scores a query against a batch of passages. Scores are unbounded reals;
/// higher is more relevant. Ordering for ranking purposes always uses the
/// raw score — [`calibrate`] is for display only.
pub trait Reranker: Send + Sync {
    fn model_id(&self) -> &str;

    /// One score per passage, same order as input.
    fn rerank(&self, query: &str, passages: &[String]) -> Vec<f64>;
}

/// Deterministic term-overlap scorer used until a real cross-encoder model
/// is configured. Scores reward shared vocabulary between query and passage
/// normalized by passage length, so short, on-topic passages rank above
/// long, loosely related ones.
pub struct TermOverlapReranker;

impl Reranker for TermOverlapReranker {
    fn model_id(&self) -> &str {
        "term-overlap-v1"
    }

    fn rerank(&self, query: &str, passages: &[String]) -> Vec<f64> {
        let query_terms: Vec<String> = tokenize(query);
        passages
            .iter()
            .map(|passage| score_one(&query_terms, passage))
            .collect()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn score_one(query_terms: &[String], passage: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let passage_terms = tokenize(passage);
    if passage_terms.is_empty() {
        return 0.0;
    }
    let matches = query_terms
        .iter()
        .filter(|qt| passage_terms.contains(qt))
        .count();
    let length_penalty = (passage_terms.len() as f64).sqrt().max(1.0);
    (matches as f64) / length_penalty
}

/// `cal(s) = sigmoid((s - s_min) / (s_max - s_min + eps) * k)`, display-only.
/// `k` controls steepness; the retrieval pipeline uses `k = 6.0`.
pub fn calibrate(score: f64, s_min: f64, s_max: f64, k: f64) -> f64 {
    const EPS: f64 = 1e-9;
    let normalized = (score - s_min) / (s_max - s_min + EPS);
    sigmoid(normalized * k)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_overlap_favors_relevant_passages() {
        let reranker = TermOverlapReranker;
        let scores = reranker.rerank(
            "feline behavior",
            &[
                "Cats exhibit feline behavior patterns daily.".to_string(),
                "The stock market closed lower today.".to_string(),
            ],
        );
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn calibration_is_monotonic_in_score() {
        let low = calibrate(0.0, 0.0, 10.0, 6.0);
        let mid = calibrate(5.0, 0.0, 10.0, 6.0);
        let high = calibrate(10.0, 0.0, 10.0, 6.0);
        assert!(low < mid && mid < high);
        assert!((0.0..=1.0).contains(&low));
        assert!((0.0..=1.0).contains(&high));
    }

    #[test]
    fn calibration_handles_degenerate_range() {
        let v = calibrate(5.0, 5.0, 5.0, 6.0);
        assert!(v.is_finite());
    }
}
