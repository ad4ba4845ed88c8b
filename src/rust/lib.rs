//! Intent classification toolkit for a Vietnamese shopping assistant.
//!
//! Three stages share this library:
//!
//! 1. [`augment`] expands a small labelled seed corpus with template-generated
//!    utterances (prices, ranges, quantities, book categories).
//! 2. [`train`] fine-tunes a pretrained encoder (XLM-RoBERTa, RoBERTa or
//!    BERT) with candle and writes an artifact bundle, including an ONNX graph.
//! 3. [`inference`] loads the bundle with ONNX Runtime and classifies text.
//!
//! # Basic Usage
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use vi_intent::IntentClassifier;
//!
//! let classifier = IntentClassifier::builder()
//!     .with_bundle("models/intent_llm")?
//!     .with_max_len(128)
//!     .build()?;
//!
//! let prediction = classifier.predict("thêm 2 cuốn sách kinh tế vào giỏ")?;
//! println!("{} ({:.3})", prediction.label, prediction.confidence);
//! # Ok(())
//! # }
//! ```

pub mod augment;
pub mod bundle;
pub mod corpus;
pub mod export;
pub mod inference;
pub mod labels;
pub mod model;
pub mod model_manager;
mod runtime;
pub mod train;

pub use augment::{augment_file, AugmentConfig, AugmentReport, Augmenter};
pub use bundle::ArtifactBundle;
pub use corpus::{CorpusError, LabeledExample};
pub use export::{export_onnx, ExportError};
pub use inference::{InferConfig, InferenceError, IntentClassifier, IntentClassifierBuilder, Prediction};
pub use labels::{LabelMap, LabelMapError};
pub use model_manager::{BaseModelFiles, ModelError, ModelManager};
pub use runtime::{create_session_builder, OptimizationLevel, RuntimeConfig};
pub use train::{fine_tune, train, TrainConfig, TrainError, TrainReport};

/// Initializes `env_logger` with an `info` default that `RUST_LOG` overrides.
pub fn init_logger() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).try_init();
}
