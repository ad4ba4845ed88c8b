#![allow(dead_code)]

use std::fs;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use env_logger::{Builder, Env};
use serde_json::json;
use vi_intent::model::{EncoderConfig, SequenceClassifier};

pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn")).try_init();
}

pub const WORDS: [&str; 12] = [
    "xin", "chào", "shop", "bạn", "ơi", "hello", "tạm", "biệt", "bye", "hẹn", "gặp", "lại",
];

/// A whitespace WordLevel tokenizer with RoBERTa-style special tokens:
/// `<s>` = 0, `<pad>` = 1, `</s>` = 2, `<unk>` = 3, then [`WORDS`].
pub fn tokenizer_json(padding: Option<u32>) -> serde_json::Value {
    let mut vocab = serde_json::Map::new();
    for (id, token) in ["<s>", "<pad>", "</s>", "<unk>"].iter().enumerate() {
        vocab.insert(token.to_string(), json!(id));
    }
    for (i, word) in WORDS.iter().enumerate() {
        vocab.insert(word.to_string(), json!(i + 4));
    }
    let padding = padding.map(|pad_id| {
        json!({
            "strategy": "BatchLongest",
            "direction": "Right",
            "pad_to_multiple_of": null,
            "pad_id": pad_id,
            "pad_type_id": 0,
            "pad_token": "<pad>"
        })
    });
    json!({
        "version": "1.0",
        "truncation": null,
        "padding": padding,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {
            "type": "RobertaProcessing",
            "sep": ["</s>", 2],
            "cls": ["<s>", 0],
            "trim_offsets": true,
            "add_prefix_space": false
        },
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "<unk>"}
    })
}

pub fn write_tokenizer(path: &Path, padding: Option<u32>) {
    fs::write(path, serde_json::to_string_pretty(&tokenizer_json(padding)).unwrap()).unwrap();
}

pub fn tiny_config() -> EncoderConfig {
    EncoderConfig {
        model_type: "xlm-roberta".to_string(),
        vocab_size: WORDS.len() + 4,
        hidden_size: 16,
        num_hidden_layers: 2,
        num_attention_heads: 4,
        intermediate_size: 32,
        hidden_act: "gelu".to_string(),
        hidden_dropout_prob: 0.1,
        attention_probs_dropout_prob: 0.1,
        max_position_embeddings: 40,
        type_vocab_size: 1,
        layer_norm_eps: 1e-5,
        pad_token_id: 1,
    }
}

/// Writes a randomly initialized base encoder (config, tokenizer, weights).
pub fn write_base_model(dir: &Path) {
    let config = tiny_config();
    fs::write(dir.join("config.json"), serde_json::to_string_pretty(&config).unwrap()).unwrap();
    write_tokenizer(&dir.join("tokenizer.json"), None);
    fs::write(dir.join("tokenizer_config.json"), r#"{"model_max_length": 512}"#).unwrap();

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    SequenceClassifier::new(&config, 2, vb).unwrap();
    varmap.save(dir.join("model.safetensors")).unwrap();
}

/// `n` lines per label of a two-intent corpus.
pub fn write_corpus(path: &Path, n: usize) {
    let greetings = ["xin chào shop", "chào bạn", "hello shop", "shop ơi", "xin chào bạn ơi"];
    let goodbyes = ["tạm biệt shop", "bye bạn", "hẹn gặp lại", "tạm biệt bạn ơi", "bye shop"];
    let mut lines = Vec::new();
    for i in 0..n {
        lines.push(json!({"text": greetings[i % greetings.len()], "label": "greeting"}).to_string());
        lines.push(json!({"message": goodbyes[i % goodbyes.len()], "intent": "goodbye"}).to_string());
    }
    fs::write(path, lines.join("\n") + "\n").unwrap();
}
