//! Recursive text splitter producing overlapping passages with stable
//! per-chunk metadata.
//!
//! Splits on an ordered list of separators (`"\n\n"`, `"\n"`, `" "`, `""`),
//! falling back to the next separator whenever a piece is still larger than
//! the target size, then packs the resulting pieces into chunks with a
//! sliding overlap window.

use crate::models::Chunk;

pub const DEFAULT_TARGET_CHARS: usize = 1_000;
pub const DEFAULT_OVERLAP_CHARS: usize = 200;
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Split `content` into ordered, overlapping [`Chunk`]s for `document_id`.
/// Returns an empty vector for empty (or all-whitespace) input.
pub fn chunk_text(document_id: &str, user_id: &str, content: &str) -> Vec<Chunk> {
    chunk_text_with(document_id, user_id, content, DEFAULT_TARGET_CHARS, DEFAULT_OVERLAP_CHARS)
}

pub fn chunk_text_with(
    document_id: &str,
    user_id: &str,
    content: &str,
    target: usize,
    overlap: usize,
) -> Vec<Chunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let pieces = split_recursive(content, &SEPARATORS, target, overlap);

    pieces
        .into_iter()
        .enumerate()
        .map(|(ordinal, text)| Chunk {
            chunk_id: Chunk::compute_id(document_id, ordinal),
            document_id: document_id.to_string(),
            user_id: user_id.to_string(),
            ordinal,
            text,
        })
        .collect()
}

fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            return (*sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

fn split_recursive(text: &str, separators: &[&str], target: usize, overlap: usize) -> Vec<String> {
    let (sep, rest) = pick_separator(text, separators);

    let raw_splits: Vec<String> = if sep.is_empty() {
        text.chars().map(|c| c.to_string()).collect()
    } else {
        text.split(sep).map(|s| s.to_string()).collect()
    };

    let mut good_splits: Vec<String> = Vec::new();
    let mut out = Vec::new();

    for piece in raw_splits {
        if piece.chars().count() <= target {
            good_splits.push(piece);
            continue;
        }
        if !good_splits.is_empty() {
            out.extend(merge_splits(&good_splits, sep, target, overlap));
            good_splits.clear();
        }
        if rest.is_empty() {
            // "" is always last and splits to individual chars, so a piece
            // this large can only occur when sep is already "".
            out.push(piece);
        } else {
            out.extend(split_recursive(&piece, rest, target, overlap));
        }
    }
    if !good_splits.is_empty() {
        out.extend(merge_splits(&good_splits, sep, target, overlap));
    }
    out
}

/// Greedily pack `splits` (joined by `separator`) into chunks no longer than
/// `target`, carrying the trailing `overlap` characters of one chunk into
/// the start of the next.
fn merge_splits(splits: &[String], separator: &str, target: usize, overlap: usize) -> Vec<String> {
    let sep_len = separator.chars().count();
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for split in splits {
        let split_len = split.chars().count();
        let added_len = if current.is_empty() { split_len } else { split_len + sep_len };

        if current_len + added_len > target && !current.is_empty() {
            chunks.push(current.join(separator));

            while current_len > overlap && current.len() > 1 {
                let removed = current.remove(0);
                current_len -= removed.chars().count() + sep_len;
            }
        }

        current.push(split.clone());
        current_len += added_len;
    }

    if !current.is_empty() {
        chunks.push(current.join(separator));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_zero_chunks() {
        assert!(chunk_text("doc", "u1", "").is_empty());
        assert!(chunk_text("doc", "u1", "   \n\n  ").is_empty());
    }

    #[test]
    fn short_input_is_a_single_chunk() {
        let chunks = chunk_text("doc", "u1", "hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "hello world");
    }

    #[test]
    fn ordinals_are_contiguous_and_chunk_ids_deterministic() {
        let long_text = "paragraph one. ".repeat(200);
        let chunks = chunk_text("doc-7", "u1", &long_text);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i);
            assert_eq!(c.chunk_id, Chunk::compute_id("doc-7", i));
        }
    }

    #[test]
    fn chunks_never_exceed_target_plus_overlap() {
        let long_text = "word ".repeat(5_000);
        let chunks = chunk_text_with("doc", "u1", &long_text, 1_000, 200);
        for c in &chunks {
            assert!(c.text.chars().count() <= 1_000 + 200);
        }
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "A paragraph.\n\nAnother one that is a bit longer than usual.\n\nAnd a third.";
        let a = chunk_text("doc", "u1", text);
        let b = chunk_text("doc", "u1", text);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.chunk_id, y.chunk_id);
        }
    }

    #[test]
    fn total_coverage_every_word_survives() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa ".repeat(100);
        let chunks = chunk_text_with("doc", "u1", &text, 1_000, 200);
        let rejoined: String = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        for word in ["alpha", "beta", "gamma", "delta", "kappa"] {
            assert!(rejoined.contains(word));
        }
    }
}
