use std::fs;
use std::path::Path;

use log::warn;
use tokenizers::{Tokenizer, TruncationParams};

use super::error::InferenceError;

/// Pad id used when the tokenizer file does not declare one.
pub const DEFAULT_PAD_ID: u32 = 0;

/// Reads `padding.pad_id` from a `tokenizer.json`, falling back to
/// [`DEFAULT_PAD_ID`] when the file is unreadable or has no padding block.
pub fn pad_id_from_tokenizer_json(path: impl AsRef<Path>) -> u32 {
    let path = path.as_ref();
    let parsed = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(json) => match json["padding"]["pad_id"].as_u64() {
            Some(id) => id as u32,
            None => {
                warn!("No padding.pad_id in {}, using {}", path.display(), DEFAULT_PAD_ID);
                DEFAULT_PAD_ID
            }
        },
        Err(e) => {
            warn!("Could not read pad id from {}: {}", path.display(), e);
            DEFAULT_PAD_ID
        }
    }
}

/// A single input encoded to exactly `max_len` positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedInput {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    /// Number of real (non-pad) tokens
    pub length: usize,
}

/// Fixed-length encoding of raw text for the classifier graph.
///
/// Implementors supply the tokenizer, the target length and the pad id; the
/// provided methods do the truncation and padding.
pub trait TextEncoding {
    fn tokenizer(&self) -> &Tokenizer;

    fn max_len(&self) -> usize;

    fn pad_id(&self) -> u32;

    /// Encodes `text` with special tokens, truncates it to `max_len` and
    /// right-pads ids with the pad id and the mask with 0.
    fn encode_fixed(&self, text: &str) -> Result<EncodedInput, InferenceError> {
        let max_len = self.max_len();
        if max_len == 0 {
            return Err(InferenceError::ValidationError("max_len must be positive".into()));
        }
        let encoding = self
            .tokenizer()
            .encode(text, true)
            .map_err(|e| InferenceError::TokenizerError(e.to_string()))?;

        let ids = encoding.get_ids();
        let length = ids.len().min(max_len);
        let pad = self.pad_id() as i64;

        let mut input_ids: Vec<i64> = ids[..length].iter().map(|&id| id as i64).collect();
        input_ids.resize(max_len, pad);
        let mut attention_mask = vec![1i64; length];
        attention_mask.resize(max_len, 0);

        Ok(EncodedInput {
            input_ids,
            attention_mask,
            length,
        })
    }
}

/// A tokenizer loaded from a bundle, configured for fixed-length encoding.
#[derive(Debug, Clone)]
pub struct InputEncoder {
    tokenizer: Tokenizer,
    max_len: usize,
    pad_id: u32,
}

impl InputEncoder {
    /// Loads `tokenizer.json`, reads its pad id and sets truncation to
    /// `max_len`. Padding is left to [`TextEncoding::encode_fixed`].
    pub fn from_file(path: impl AsRef<Path>, max_len: usize) -> Result<Self, InferenceError> {
        let path = path.as_ref();
        let mut tokenizer = Tokenizer::from_file(path)
            .map_err(|e| InferenceError::TokenizerError(format!("Failed to load {}: {}", path.display(), e)))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_len,
                ..Default::default()
            }))
            .map_err(|e| InferenceError::TokenizerError(e.to_string()))?;
        tokenizer.with_padding(None);

        Ok(Self {
            tokenizer,
            max_len,
            pad_id: pad_id_from_tokenizer_json(path),
        })
    }
}

impl TextEncoding for InputEncoder {
    fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }
}
