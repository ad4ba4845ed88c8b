use std::collections::HashMap;
use std::sync::Arc;

use ndarray::Array2;
use ort::session::Session;
use ort::value::Tensor;
use serde::Serialize;
use tokenizers::Tokenizer;

use super::builder::IntentClassifierBuilder;
use super::encoding::{EncodedInput, InputEncoder, TextEncoding};
use super::error::InferenceError;
use super::utils::{argmax, softmax, top_k};
use crate::bundle::ArtifactBundle;
use crate::export::{ATTENTION_MASK, INPUT_IDS, TOKEN_TYPE_IDS};
use crate::labels::LabelMap;

/// The best label for an input and its softmax probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    /// Probability of every label, indexed by label id
    #[serde(skip)]
    pub probabilities: Vec<f32>,
}

/// An intent classifier backed by an exported ONNX graph.
///
/// All shared state sits behind `Arc`, so the classifier is `Send + Sync`
/// and can be cloned cheaply into worker threads.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    pub(super) encoder: Arc<InputEncoder>,
    pub(super) session: Arc<Session>,
    pub(super) labels: Arc<LabelMap>,
    pub(super) uses_token_types: bool,
    pub(super) bundle: ArtifactBundle,
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<IntentClassifier>();
    }
};

impl TextEncoding for IntentClassifier {
    fn tokenizer(&self) -> &Tokenizer {
        self.encoder.tokenizer()
    }

    fn max_len(&self) -> usize {
        self.encoder.max_len()
    }

    fn pad_id(&self) -> u32 {
        self.encoder.pad_id()
    }
}

fn input_tensor(values: Vec<i64>, len: usize) -> Result<Tensor<i64>, InferenceError> {
    let array = Array2::from_shape_vec((1, len), values)
        .map_err(|e| InferenceError::ModelError(format!("Failed to create input array: {}", e)))?;
    Tensor::from_array(array).map_err(|e| InferenceError::ModelError(format!("Failed to create input tensor: {}", e)))
}

impl IntentClassifier {
    pub fn builder() -> IntentClassifierBuilder {
        IntentClassifierBuilder::new()
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn bundle(&self) -> &ArtifactBundle {
        &self.bundle
    }

    pub fn uses_token_types(&self) -> bool {
        self.uses_token_types
    }

    /// Raw logits for `text`, one per label. Empty text still encodes to
    /// the special tokens and is classified like any other input.
    pub fn logits(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        let EncodedInput {
            input_ids,
            attention_mask,
            ..
        } = self.encode_fixed(text)?;
        let len = input_ids.len();

        let mut inputs = HashMap::new();
        inputs.insert(INPUT_IDS, input_tensor(input_ids, len)?);
        inputs.insert(ATTENTION_MASK, input_tensor(attention_mask, len)?);
        if self.uses_token_types {
            inputs.insert(TOKEN_TYPE_IDS, input_tensor(vec![0; len], len)?);
        }

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| InferenceError::ModelError(format!("Failed to run model: {}", e)))?;
        let output = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::ModelError(format!("Failed to extract logits: {}", e)))?;

        let shape = output.shape().to_vec();
        if shape.len() != 2 || shape[1] != self.labels.len() {
            return Err(InferenceError::ModelError(format!(
                "Logits shape {:?} does not match {} labels",
                shape,
                self.labels.len()
            )));
        }
        Ok(output.slice(ndarray::s![0, ..]).iter().copied().collect())
    }

    /// Classifies `text`.
    ///
    /// # Errors
    /// `TokenizerError` if encoding fails, `ModelError` if the graph fails or
    /// its output width differs from the label count.
    pub fn predict(&self, text: &str) -> Result<Prediction, InferenceError> {
        let probabilities = softmax(&self.logits(text)?);
        let best = argmax(&probabilities)
            .ok_or_else(|| InferenceError::ModelError("Model returned no logits".into()))?;
        let label = self
            .labels
            .label(best)
            .ok_or_else(|| InferenceError::LabelError(format!("No label for class id {}", best)))?;

        Ok(Prediction {
            label: label.to_string(),
            confidence: probabilities[best],
            probabilities,
        })
    }
}

impl Prediction {
    /// The `k` most probable labels, best first.
    pub fn top_k<'a>(&self, labels: &'a LabelMap, k: usize) -> Vec<(&'a str, f32)> {
        top_k(&self.probabilities, k)
            .into_iter()
            .filter_map(|id| labels.label(id).map(|label| (label, self.probabilities[id])))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_serializes_label_and_confidence() {
        let prediction = Prediction {
            label: "greeting".into(),
            confidence: 0.5,
            probabilities: vec![0.5, 0.3, 0.2],
        };
        let json = serde_json::to_string(&prediction).unwrap();
        assert_eq!(json, r#"{"label":"greeting","confidence":0.5}"#);
    }

    #[test]
    fn test_top_k_labels() {
        let labels = LabelMap::from_labels(["a", "b", "c"]).unwrap();
        let prediction = Prediction {
            label: "b".into(),
            confidence: 0.6,
            probabilities: vec![0.3, 0.6, 0.1],
        };
        assert_eq!(prediction.top_k(&labels, 2), vec![("b", 0.6), ("a", 0.3)]);
    }
}
