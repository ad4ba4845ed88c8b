//! Transformer encoder with a sequence-classification head, built on candle.
//!
//! Parameter names follow the Hugging Face layout (`roberta.encoder.layer.3.
//! attention.self.query.weight`, `classifier.out_proj.bias`, ...) so the same
//! safetensors files load here, save from here, and feed the ONNX exporter.

mod config;
mod encoder;
mod weights;

use std::io;

pub use config::{Activation, EncoderConfig, EncoderKind};
pub use encoder::{attention_bias, roberta_position_ids, SequenceClassifier, ATTENTION_MASK_VALUE};
pub use weights::{load_pretrained, save_bundle_config, LoadReport, INIT_STD};

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid config JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Unsupported encoder: {0}")]
    Unsupported(String),
    #[error("Invalid encoder config: {0}")]
    Invalid(String),
    #[error("Shape mismatch for '{name}': checkpoint {checkpoint:?}, model {model:?}")]
    ShapeMismatch {
        name: String,
        checkpoint: Vec<usize>,
        model: Vec<usize>,
    },
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}
