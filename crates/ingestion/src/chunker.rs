//! Token window chunking
//!
//! Splits text into fixed-width token windows that overlap by a fixed
//! number of tokens, so passages keep context across their boundaries.

use crate::errors::IngestionError;
use ragline_common::models::Chunk;
use ragline_common::Tokenizer;
use std::sync::Arc;
use tracing::debug;

/// Start offsets of every window over `token_count` tokens
pub fn window_starts(token_count: usize, chunk_size: usize, chunk_overlap: usize) -> Vec<usize> {
    let stride = chunk_size - chunk_overlap;
    (0..token_count).step_by(stride).collect()
}

/// Fixed-width sliding window chunker
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Requires `chunk_size > 0` and `chunk_overlap < chunk_size`
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self, IngestionError> {
        if chunk_size == 0 {
            return Err(IngestionError::ChunkingError(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestionError::ChunkingError(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }

        Ok(Self {
            tokenizer,
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    /// Split `text` into windows of at most `chunk_size` tokens.
    ///
    /// Text shorter than one window yields a single chunk; empty text
    /// yields none.
    pub fn chunk(&self, text: &str, source_id: &str) -> Vec<Chunk> {
        let tokens = self.tokenizer.encode(text);
        let starts = window_starts(tokens.len(), self.chunk_size, self.chunk_overlap);

        let chunks: Vec<Chunk> = starts
            .into_iter()
            .enumerate()
            .map(|(chunk_index, start)| {
                let end = (start + self.chunk_size).min(tokens.len());
                let window = &tokens[start..end];
                Chunk {
                    text: self.tokenizer.decode(window),
                    source_id: source_id.to_string(),
                    chunk_index,
                    token_count: window.len(),
                    token_offset: start,
                }
            })
            .collect();

        debug!(
            source_id,
            tokens = tokens.len(),
            chunk_count = chunks.len(),
            chunk_size = self.chunk_size,
            chunk_overlap = self.chunk_overlap,
            "Text chunked"
        );

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_common::tokenizer::CharTokenizer;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(Arc::new(CharTokenizer), size, overlap).unwrap()
    }

    #[test]
    fn test_small_windows() {
        let chunks = chunker(3, 1).chunk("ABCDEF", "doc");

        let offsets: Vec<usize> = chunks.iter().map(|c| c.token_offset).collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
        assert_eq!(texts, vec!["ABC", "CDE", "EF"]);
    }

    #[test]
    fn test_long_document_two_windows() {
        let text = "x".repeat(700);
        let chunks = chunker(512, 50).chunk(&text, "doc");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].token_count, 512);
        assert_eq!(chunks[1].token_offset, 462);
        assert_eq!(chunks[1].token_count, 238);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunker(512, 50).chunk("Helsenorge", "doc");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Helsenorge");
        assert_eq!(chunks[0].source_id, "doc");
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunker(4, 1).chunk("", "doc").is_empty());
    }

    #[test]
    fn test_windows_bounded_and_reconstructible() {
        let text: String = "Lov om helseregistre og behandling av helseopplysninger. ".repeat(5);
        let tokens: Vec<char> = text.chars().collect();

        for (size, overlap) in [(1, 0), (3, 1), (7, 0), (10, 9), (64, 16), (512, 50)] {
            let chunks = chunker(size, overlap).chunk(&text, "doc");

            let mut rebuilt = String::new();
            for (i, chunk) in chunks.iter().enumerate() {
                assert!(chunk.token_count <= size);
                let skip = if i == 0 { 0 } else { overlap };
                rebuilt.extend(chunk.text.chars().skip(skip));
            }

            let rebuilt: Vec<char> = rebuilt.chars().collect();
            assert_eq!(rebuilt, tokens, "size {} overlap {}", size, overlap);
        }
    }

    #[test]
    fn test_consecutive_windows_share_overlap() {
        let chunks = chunker(8, 3).chunk("abcdefghijklmnopqrstuvwxyz", "doc");
        for pair in chunks.windows(2) {
            if pair[1].token_count < 3 {
                continue;
            }
            let tail: String = pair[0].text.chars().skip(8 - 3).collect();
            let head: String = pair[1].text.chars().take(3).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(Chunker::new(Arc::new(CharTokenizer), 0, 0).is_err());
        assert!(Chunker::new(Arc::new(CharTokenizer), 10, 10).is_err());
        assert!(Chunker::new(Arc::new(CharTokenizer), 10, 11).is_err());
    }
}
