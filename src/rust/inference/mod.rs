//! ONNX Runtime inference over a trained bundle.

mod builder;
mod classifier;
mod encoding;
mod error;
mod utils;

use std::path::PathBuf;

pub use builder::{IntentClassifierBuilder, DEFAULT_MAX_LEN};
pub use classifier::{IntentClassifier, Prediction};
pub use encoding::{pad_id_from_tokenizer_json, EncodedInput, InputEncoder, TextEncoding, DEFAULT_PAD_ID};
pub use error::InferenceError;
pub use utils::{argmax, softmax, top_k};

#[derive(Debug, Clone)]
pub struct InferConfig {
    pub model_dir: PathBuf,
    pub max_len: usize,
    /// Extra labels to report besides the best one
    pub top_k: usize,
}

impl Default for InferConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/intent_llm"),
            max_len: DEFAULT_MAX_LEN,
            top_k: 1,
        }
    }
}
