use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info};
use ort::session::Session;

use super::classifier::IntentClassifier;
use super::encoding::InputEncoder;
use super::error::InferenceError;
use crate::bundle::ArtifactBundle;
use crate::export::{ATTENTION_MASK, INPUT_IDS, TOKEN_TYPE_IDS};
use crate::labels::LabelMap;
use crate::runtime::{create_session_builder, RuntimeConfig};

pub const DEFAULT_MAX_LEN: usize = 128;

/// Fluent construction of an [`IntentClassifier`] from a bundle directory.
#[derive(Debug)]
pub struct IntentClassifierBuilder {
    bundle: Option<ArtifactBundle>,
    max_len: usize,
    runtime_config: RuntimeConfig,
}

impl Default for IntentClassifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifierBuilder {
    pub fn new() -> Self {
        Self {
            bundle: None,
            max_len: DEFAULT_MAX_LEN,
            runtime_config: RuntimeConfig::default(),
        }
    }

    /// Sets the bundle directory written by the trainer.
    ///
    /// # Errors
    /// `ModelError` if the directory lacks `labels.json`,
    /// `hf_model/tokenizer.json` or `onnx/model.onnx`.
    pub fn with_bundle(mut self, dir: impl AsRef<Path>) -> Result<Self, InferenceError> {
        let bundle = ArtifactBundle::new(dir.as_ref());
        if !bundle.is_complete() {
            return Err(InferenceError::ModelError(format!(
                "Incomplete model bundle at {}",
                dir.as_ref().display()
            )));
        }
        self.bundle = Some(bundle);
        Ok(self)
    }

    /// Fixed input length: longer inputs are truncated, shorter ones padded.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    pub fn build(self) -> Result<IntentClassifier, InferenceError> {
        let bundle = self
            .bundle
            .ok_or_else(|| InferenceError::ValidationError("No model bundle set".into()))?;
        if self.max_len == 0 {
            return Err(InferenceError::ValidationError("max_len must be positive".into()));
        }

        let labels = LabelMap::load(bundle.labels_path())?;
        debug!("Loaded {} labels from {:?}", labels.len(), bundle.labels_path());

        let encoder = InputEncoder::from_file(bundle.tokenizer_path(), self.max_len).map_err(|e| {
            error!("Failed to load tokenizer: {}", e);
            e
        })?;

        let session = create_session_builder(&self.runtime_config)?.commit_from_file(bundle.onnx_path())?;
        let uses_token_types = Self::validate_model(&session)?;
        info!(
            "Loaded intent model from {} ({} labels)",
            bundle.root().display(),
            labels.len()
        );

        Ok(IntentClassifier {
            encoder: Arc::new(encoder),
            session: Arc::new(session),
            labels: Arc::new(labels),
            uses_token_types,
            bundle,
        })
    }

    /// Checks the graph inputs and outputs. Returns whether the graph
    /// declares `token_type_ids`.
    fn validate_model(session: &Session) -> Result<bool, InferenceError> {
        let declares = |name: &str| session.inputs.iter().any(|input| input.name == name);
        for required in [INPUT_IDS, ATTENTION_MASK] {
            if !declares(required) {
                return Err(InferenceError::ModelError(format!("Model has no '{}' input", required)));
            }
        }
        if session.outputs.is_empty() {
            return Err(InferenceError::ModelError("Model has no outputs".into()));
        }
        Ok(declares(TOKEN_TYPE_IDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bundle() {
        let err = IntentClassifierBuilder::new().build().unwrap_err();
        assert!(matches!(err, InferenceError::ValidationError(_)));
    }

    #[test]
    fn test_incomplete_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let err = IntentClassifierBuilder::new().with_bundle(dir.path()).unwrap_err();
        assert!(matches!(err, InferenceError::ModelError(_)));
    }
}
