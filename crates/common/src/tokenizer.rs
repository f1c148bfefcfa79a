//! Token counting and window decoding
//!
//! The chunker works on token ids, not characters, so chunk sizes line up
//! with what the embedding model actually sees.

use crate::errors::{AppError, Result};
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Token id
pub type Token = u32;

/// Converts between text and model token ids
pub trait Tokenizer: Send + Sync {
    /// Tokenize text into a flat id sequence
    fn encode(&self, text: &str) -> Vec<Token>;

    /// Decode a (possibly partial) token window back into text
    fn decode(&self, tokens: &[Token]) -> String;

    /// Number of tokens in `text`
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Byte-pair tokenizer matching the embedding model's vocabulary
pub struct BpeTokenizer {
    bpe: CoreBPE,
}

impl BpeTokenizer {
    /// Select the vocabulary used by `model`, falling back to `cl100k_base`
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                debug!(model = model, error = %e, "No tokenizer mapping for model, using cl100k_base");
                tiktoken_rs::cl100k_base().map_err(|e| AppError::Internal {
                    message: format!("Failed to load cl100k_base tokenizer: {}", e),
                })?
            }
        };
        Ok(Self { bpe })
    }
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Vec<Token> {
        self.bpe
            .encode_ordinary(text)
            .into_iter()
            .map(|t| t as Token)
            .collect()
    }

    /// Windows cut at arbitrary token offsets can split a multi-byte
    /// character; the broken edge decodes to U+FFFD and the rest is kept.
    fn decode(&self, tokens: &[Token]) -> String {
        let bytes: Vec<u8> = self
            .bpe
            ._decode_native_and_split(tokens.iter().map(|&t| t as _).collect())
            .flatten()
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// One token per Unicode scalar value.
///
/// Vocabulary-free, so offsets are easy to reason about; used for dry runs
/// and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Vec<Token> {
        text.chars().map(|c| c as Token).collect()
    }

    fn decode(&self, tokens: &[Token]) -> String {
        tokens
            .iter()
            .map(|&t| char::from_u32(t).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}
