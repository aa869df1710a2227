//! Recursive character splitter.
//!
//! Text is cut at the highest-priority separator present, pieces that are
//! still too long are cut again with the remaining separators, and small
//! pieces are merged back up to `chunk_size` characters with up to
//! `chunk_overlap` characters carried into the next chunk. Separators stay
//! attached to the start of the piece that follows them.

use std::collections::VecDeque;

use thiserror::Error;

use crate::config::KnowledgeSettings;
use crate::domain::Document;

/// Metadata key holding a chunk's position within its source document
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitterError {
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(
        chunk_size: usize,
        chunk_overlap: usize,
        separators: Vec<String>,
    ) -> Result<Self, SplitterError> {
        if chunk_overlap >= chunk_size {
            return Err(SplitterError::OverlapTooLarge {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators,
        })
    }

    pub fn from_settings(settings: &KnowledgeSettings) -> Result<Self, SplitterError> {
        Self::new(
            settings.chunk_size,
            settings.chunk_overlap,
            settings.separators.clone(),
        )
    }

    /// Split every document, tagging each chunk with its index in the source
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut chunks = Vec::new();

        for document in documents {
            for (index, text) in self.split_text(&document.content).into_iter().enumerate() {
                let mut chunk = Document::new(text);
                chunk.metadata = document.metadata.clone();
                chunks.push(chunk.with_metadata(CHUNK_INDEX_KEY, index.to_string()));
            }
        }

        chunks
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        // First separator present in the text; "" always matches
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.as_str();
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut short: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                short.push(piece);
                continue;
            }

            if !short.is_empty() {
                chunks.extend(self.merge(&short));
                short.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !short.is_empty() {
            chunks.extend(self.merge(&short));
        }

        chunks
    }

    /// Greedily pack pieces into chunks, keeping a tail of overlap
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_chunk(&mut chunks, &window);

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        push_chunk(&mut chunks, &window);
        chunks
    }
}

fn push_chunk(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split so that each separator begins the piece after it
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(&text[start..idx]);
        start = idx;
    }
    pieces.push(&text[start..]);

    pieces.retain(|piece| !piece.is_empty());
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(size: usize, overlap: usize, separators: &[&str]) -> RecursiveSplitter {
        RecursiveSplitter::new(size, overlap, separators.iter().map(|s| s.to_string()).collect())
            .unwrap()
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let s = splitter(1000, 200, &["\n\n", "\n", " ", ""]);
        assert_eq!(s.split_text("  Hello world.  "), vec!["Hello world."]);
    }

    #[test]
    fn test_paragraphs_pack_up_to_chunk_size() {
        let s = splitter(10, 0, &["\n\n", "\n", " ", ""]);
        assert_eq!(
            s.split_text("aaaa\n\nbbbb\n\ncccc"),
            vec!["aaaa\n\nbbbb", "cccc"]
        );
    }

    #[test]
    fn test_character_fallback_with_overlap() {
        let s = splitter(4, 2, &[" ", ""]);
        assert_eq!(
            s.split_text("abcdefghij"),
            vec!["abcd", "cdef", "efgh", "ghij"]
        );
    }

    #[test]
    fn test_separator_starts_following_chunk() {
        let s = splitter(9, 0, &[". ", ""]);
        assert_eq!(s.split_text("one. two. three."), vec!["one. two", ". three."]);
    }

    #[test]
    fn test_lengths_count_characters() {
        let s = splitter(3, 0, &[""]);
        assert_eq!(s.split_text("一二三四五六"), vec!["一二三", "四五六"]);
    }

    #[test]
    fn test_long_piece_is_split_with_lower_priority_separators() {
        let s = splitter(12, 0, &["\n\n", " ", ""]);
        let chunks = s.split_text("short\n\nthis paragraph is long");

        assert_eq!(chunks[0], "short");
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
        assert_eq!(chunks.concat().replace(' ', ""), "shortthisparagraphislong");
    }

    #[test]
    fn test_whitespace_only_text_yields_nothing() {
        let s = splitter(10, 0, &["\n", ""]);
        assert!(s.split_text("\n\n   \n").is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = RecursiveSplitter::new(100, 100, vec![]).unwrap_err();
        assert_eq!(err, SplitterError::OverlapTooLarge { size: 100, overlap: 100 });
    }

    #[test]
    fn test_split_documents_keeps_metadata() {
        let s = splitter(10, 0, &["\n\n", ""]);
        let doc = Document::new("aaaa\n\nbbbbbbbb").with_metadata("source", "handbook.md");

        let chunks = s.split_documents(&[doc]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].source(), Some("handbook.md"));
        assert_eq!(chunks[1].metadata.get(CHUNK_INDEX_KEY).map(String::as_str), Some("1"));
    }
}
