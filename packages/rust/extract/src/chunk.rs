//! Fixed-size text chunking.
//!
//! Splits on char boundaries every `chunk_size` chars with no overlap and no
//! awareness of words or sentences. Concatenating the output reproduces the
//! input exactly.

use ragline_shared::{RaglineError, Result};

/// Split `text` into consecutive fragments of `chunk_size` chars.
///
/// The last fragment may be shorter. Empty input yields no fragments.
pub fn chunk_text(text: &str, chunk_size: usize) -> Result<Vec<String>> {
    if chunk_size == 0 {
        return Err(RaglineError::validation("chunk size must be greater than zero"));
    }

    let mut chunks = Vec::with_capacity(text.len() / chunk_size + 1);
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == chunk_size {
            chunks.push(text[start..idx].to_string());
            start = idx;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        chunks.push(text[start..].to_string());
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_fixed_sizes() {
        let text = "a".repeat(450);
        let chunks = chunk_text(&text, 200).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(sizes, vec![200, 200, 50]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let text = "b".repeat(400);
        let chunks = chunk_text(&text, 200).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 200));
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("Paris is the capital.", 200).unwrap();
        assert_eq!(chunks, vec!["Paris is the capital.".to_string()]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(chunk_text("", 200).unwrap().is_empty());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let err = chunk_text("abc", 0).unwrap_err();
        assert!(err.to_string().contains("chunk size"));
    }

    #[test]
    fn concatenation_reproduces_input() {
        let inputs = [
            "The quick brown fox jumps over the lazy dog. ".repeat(17),
            "naïve café — déjà vu, 東京タワー, emoji 🚀🚀 ".repeat(9),
            "x".to_string(),
        ];
        for input in &inputs {
            for size in [1, 3, 7, 200] {
                let chunks = chunk_text(input, size).unwrap();
                assert_eq!(chunks.concat(), *input, "size {size}");
                assert!(chunks.iter().all(|c| c.chars().count() <= size));
                assert!(
                    chunks[..chunks.len() - 1]
                        .iter()
                        .all(|c| c.chars().count() == size)
                );
            }
        }
    }

    #[test]
    fn splits_mid_word_and_respects_char_boundaries() {
        let chunks = chunk_text("héllo wörld", 4).unwrap();
        assert_eq!(chunks, vec!["héll", "o wö", "rld"]);
    }

    #[test]
    fn deterministic() {
        let text = "repeatable input ".repeat(40);
        assert_eq!(chunk_text(&text, 200).unwrap(), chunk_text(&text, 200).unwrap());
    }
}
