use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::EncoderError;

/// Encoder family, derived from `model_type` in `config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    /// RoBERTa and XLM-RoBERTa: positions offset by the pad id,
    /// `classifier.dense` + `classifier.out_proj` head.
    Roberta,
    /// BERT: positions from 0, pooler + `classifier` head.
    Bert,
}

impl EncoderKind {
    pub fn from_model_type(model_type: &str) -> Result<Self, EncoderError> {
        match model_type {
            "xlm-roberta" | "roberta" => Ok(Self::Roberta),
            "bert" => Ok(Self::Bert),
            other => Err(EncoderError::Unsupported(format!("model_type '{}'", other))),
        }
    }

    /// Parameter prefix of the encoder body.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Roberta => "roberta",
            Self::Bert => "bert",
        }
    }

    /// Dense layer applied to the first token before the output projection.
    pub fn head_dense(self) -> &'static str {
        match self {
            Self::Roberta => "classifier.dense",
            Self::Bert => "bert.pooler.dense",
        }
    }

    pub fn head_out(self) -> &'static str {
        match self {
            Self::Roberta => "classifier.out_proj",
            Self::Bert => "classifier",
        }
    }

    pub fn architecture(self, model_type: &str) -> &'static str {
        match (self, model_type) {
            (Self::Roberta, "xlm-roberta") => "XLMRobertaForSequenceClassification",
            (Self::Roberta, _) => "RobertaForSequenceClassification",
            (Self::Bert, _) => "BertForSequenceClassification",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    GeluErf,
    GeluTanh,
}

impl Activation {
    fn parse(name: &str) -> Result<Self, EncoderError> {
        match name {
            "gelu" => Ok(Self::GeluErf),
            "gelu_new" | "gelu_pytorch_tanh" | "gelu_fast" => Ok(Self::GeluTanh),
            other => Err(EncoderError::Unsupported(format!("hidden_act '{}'", other))),
        }
    }
}

fn default_dropout() -> f64 {
    0.1
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_hidden_act() -> String {
    "gelu".to_string()
}

/// The subset of a Hugging Face encoder `config.json` the classifier needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub model_type: String,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: String,
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f64,
    #[serde(default = "default_dropout")]
    pub attention_probs_dropout_prob: f64,
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub pad_token_id: u32,
}

impl EncoderConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EncoderError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EncoderError> {
        EncoderKind::from_model_type(&self.model_type)?;
        Activation::parse(&self.hidden_act)?;
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(EncoderError::Invalid(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        Ok(())
    }

    pub fn kind(&self) -> Result<EncoderKind, EncoderError> {
        EncoderKind::from_model_type(&self.model_type)
    }

    pub fn activation(&self) -> Result<Activation, EncoderError> {
        Activation::parse(&self.hidden_act)
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn has_token_types(&self) -> bool {
        self.type_vocab_size > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_xlm_roberta_config() {
        let json = r#"{
            "model_type": "xlm-roberta",
            "vocab_size": 250002,
            "hidden_size": 1024,
            "num_hidden_layers": 24,
            "num_attention_heads": 16,
            "intermediate_size": 4096,
            "hidden_act": "gelu",
            "max_position_embeddings": 514,
            "type_vocab_size": 1,
            "layer_norm_eps": 1e-05,
            "pad_token_id": 1,
            "architectures": ["XLMRobertaForMaskedLM"]
        }"#;
        let config: EncoderConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.kind().unwrap(), EncoderKind::Roberta);
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.pad_token_id, 1);
        assert!(config.has_token_types());
        assert_eq!(config.hidden_dropout_prob, 0.1);
    }

    #[test]
    fn test_unsupported_model_type() {
        assert!(EncoderKind::from_model_type("t5").is_err());
        assert_eq!(EncoderKind::Bert.head_out(), "classifier");
        assert_eq!(
            EncoderKind::Roberta.architecture("xlm-roberta"),
            "XLMRobertaForSequenceClassification"
        );
    }
}
