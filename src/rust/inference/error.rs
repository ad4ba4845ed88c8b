use ort::Error as OrtError;
use std::fmt;

use crate::labels::LabelMapError;

/// Errors raised while loading a bundle or classifying text.
#[derive(Debug)]
pub enum InferenceError {
    /// The tokenizer could not be loaded or failed to encode the input
    TokenizerError(String),
    /// The ONNX graph could not be loaded, run or did not match the labels
    ModelError(String),
    /// `labels.json` is missing or malformed
    LabelError(String),
    /// The caller passed an unusable input
    ValidationError(String),
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenizerError(msg) => write!(f, "Tokenizer error: {}", msg),
            Self::ModelError(msg) => write!(f, "Model error: {}", msg),
            Self::LabelError(msg) => write!(f, "Label error: {}", msg),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for InferenceError {}

impl From<OrtError> for InferenceError {
    fn from(err: OrtError) -> Self {
        InferenceError::ModelError(err.to_string())
    }
}

impl From<LabelMapError> for InferenceError {
    fn from(err: LabelMapError) -> Self {
        InferenceError::LabelError(err.to_string())
    }
}
