//! Embedding trait, vector codec, and the distance/similarity math shared by
//! the vector store manager and the retrieval pipeline.
//!
//! Distance is L2 on non-normalized embeddings (for compatibility with the
//! model in use — the source never normalizes vectors). Calibrated
//! similarity reported to callers is `1 / (1 + distance)`, clamped to
//! `[0, 1]`. This is deliberately not a cosine similarity; see
//! [`calibrated_similarity`].

pub const EMBEDDING_DIMS: usize = 384;
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Deterministic text-to-vector mapping. A given model version must return
/// the same vector for the same text every time.
pub trait Embedder: Send + Sync {
    /// Stable identifier stamped into a vector index's sidecar; a mismatch
    /// between a loaded index and the running embedder is a version
    /// mismatch and must refuse to serve reads.
    fn model_id(&self) -> &str;

    fn dims(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;

    /// Batched embedding using model-native batching where available; the
    /// default just maps [`Embedder::embed`] one text at a time.
    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Deterministic, dependency-free embedder used when no real sentence
/// model is configured (tests, offline dev, and as the base case the
/// native crate's model-backed embedder falls back to on load failure).
///
/// Not a semantic model: it hashes overlapping token shingles into a fixed
/// 384-dim vector and L2-normalizes the result, giving a stable, reproducible
/// vector per input text that still varies smoothly with shared vocabulary,
/// which is enough to exercise the rest of the pipeline deterministically.
pub struct HashEmbedder {
    dims: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dims: EMBEDDING_DIMS }
    }
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-shingle-v1"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dims];
        let normalized = text.to_lowercase();
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        if tokens.is_empty() {
            return vector;
        }
        for window in tokens.windows(2.min(tokens.len()).max(1)) {
            let shingle = window.join(" ");
            let hash = fnv1a(shingle.as_bytes());
            let idx = (hash as usize) % self.dims;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Little-endian `f32` byte codec used for the on-disk vector index and any
/// BLOB storage of raw vectors.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Squared L2 distance would be cheaper, but the public contract (and the
/// calibration formula) is defined in terms of true L2 distance.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// `sim = 1 / (1 + distance)`, clamped to `[0, 1]`. Monotone with distance,
/// not a probability or a cosine similarity.
pub fn calibrated_similarity(distance: f32) -> f32 {
    if !distance.is_finite() || distance < 0.0 {
        return 0.0;
    }
    (1.0 / (1.0 + distance)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip_preserves_values() {
        let v = vec![0.5f32, -1.25, 3.0, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn hash_embedder_is_deterministic() {
        let e = HashEmbedder::default();
        assert_eq!(e.embed("hello world"), e.embed("hello world"));
        assert_eq!(e.dims(), EMBEDDING_DIMS);
    }

    #[test]
    fn hash_embedder_empty_text_is_zero_vector() {
        let e = HashEmbedder::default();
        assert!(e.embed("").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn calibrated_similarity_is_bounded_and_monotone() {
        let near = calibrated_similarity(0.0);
        let mid = calibrated_similarity(1.0);
        let far = calibrated_similarity(10.0);
        assert_eq!(near, 1.0);
        assert!(near > mid && mid > far);
        assert!(far >= 0.0);
        assert!(calibrated_similarity(f32::NAN) == 0.0);
        assert!(calibrated_similarity(-1.0) == 0.0);
    }

    #[test]
    fn l2_distance_mismatched_lengths_is_infinite() {
        assert_eq!(l2_distance(&[1.0, 2.0], &[1.0]), f32::INFINITY);
    }
}
