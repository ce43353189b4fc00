//! Recursive character text splitter.
//!
//! Splits document text into [`TextChunk`]s of at most `chunk_size`
//! characters, preferring paragraph boundaries, then line breaks, then
//! spaces, and only falling back to single characters when a run of text
//! has no better boundary. Neighbouring chunks share up to `chunk_overlap`
//! characters of context.
//!
//! Each chunk carries a SHA-256 hash of its text, stored alongside it in the
//! vector store.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

/// Separators tried in order, coarsest first. `""` splits into characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A chunk of document text ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub hash: String,
}

/// Split `text` into chunks with contiguous indices starting at 0.
///
/// Whitespace-only input yields no chunks.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<TextChunk> {
    split_text(text, chunk_size, chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(index, text)| make_chunk(index, text))
        .collect()
}

/// Split `text` into strings of at most `chunk_size` characters.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let splitter = Splitter {
        chunk_size: chunk_size.max(1),
        chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
    };
    splitter.split(text, &SEPARATORS)
}

struct Splitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl Splitter {
    fn split(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        // Pick the first separator present in the text.
        let mut separator = "";
        let mut finer: &[&'static str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() || text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|p| !p.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split(piece, finer));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting, separator));
        }
        chunks
    }

    /// Greedily join small pieces into chunks, carrying overlap forward.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            let joiner = if window.is_empty() { 0 } else { sep_len };

            if total + len + joiner > self.chunk_size && !window.is_empty() {
                push_joined(&mut docs, &window, separator);

                // Shrink the window to the overlap, and until the new piece fits.
                while total > self.chunk_overlap
                    || (total > 0
                        && total + len + if window.is_empty() { 0 } else { sep_len }
                            > self.chunk_size)
                {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(front) + if window.is_empty() { 0 } else { sep_len };
                }
            }

            let joiner = if window.is_empty() { 0 } else { sep_len };
            window.push_back(piece);
            total += len + joiner;
        }

        push_joined(&mut docs, &window, separator);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn make_chunk(index: usize, text: String) -> TextChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    TextChunk { index, text, hash }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", 1000, 200).is_empty());
        assert!(chunk_text(" \n\n ", 1000, 200).is_empty());
    }

    #[test]
    fn test_paragraphs_merge_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split_text(text, 1000, 0);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, 50, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(char_len(c) <= 50, "chunk too long: {:?}", c);
        }
    }

    #[test]
    fn test_overlap_carries_context() {
        let text = "aaaa bbbb cccc dddd eeee";
        let chunks = split_text(text, 10, 5);
        assert_eq!(chunks, vec!["aaaa bbbb", "bbbb cccc", "cccc dddd", "dddd eeee"]);
    }

    #[test]
    fn test_long_word_falls_back_to_characters() {
        let chunks = split_text("abcdefghij", 4, 0);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_multibyte_text_is_split_on_char_boundaries() {
        let chunks = split_text("ééééééé", 3, 0);
        assert_eq!(chunks, vec!["ééé", "ééé", "é"]);
    }

    #[test]
    fn test_indices_contiguous_and_deterministic() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let c1 = chunk_text(&text, 60, 10);
        let c2 = chunk_text(&text, 60, 10);
        assert_eq!(c1, c2);
        for (i, c) in c1.iter().enumerate() {
            assert_eq!(c.index, i, "Index mismatch at position {}", i);
            assert_eq!(c.hash.len(), 64);
        }
    }
}
