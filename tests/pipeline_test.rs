mod common;

use std::fs;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use vi_intent::inference::{InputEncoder, TextEncoding};
use vi_intent::model::SequenceClassifier;
use vi_intent::{fine_tune, train, ArtifactBundle, BaseModelFiles, IntentClassifier, LabelMap, TrainConfig};

fn assert_same_tensors(a: &std::path::Path, b: &std::path::Path) {
    let left = candle_core::safetensors::load(a, &Device::Cpu).unwrap();
    let right = candle_core::safetensors::load(b, &Device::Cpu).unwrap();
    assert_eq!(left.len(), right.len());
    for (name, tensor) in &left {
        let other = &right[name];
        assert_eq!(tensor.dims(), other.dims(), "{}", name);
        let diff = (tensor - other)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(diff, 0.0, "{} differs from the best checkpoint", name);
    }
}

fn tiny_train_config() -> TrainConfig {
    TrainConfig {
        base_model: String::new(),
        epochs: 2,
        learning_rate: 1e-3,
        batch_size: 4,
        max_len: 16,
        eval_ratio: 0.2,
        logging_steps: 2,
        ..Default::default()
    }
}

#[test]
fn test_fine_tune_writes_bundle_and_onnx_matches_candle() -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let dir = tempfile::tempdir()?;
    let base_dir = dir.path().join("base");
    fs::create_dir_all(&base_dir)?;
    common::write_base_model(&base_dir);
    let data = dir.path().join("train.jsonl");
    common::write_corpus(&data, 10);
    let out = dir.path().join("intent_llm");

    let base = BaseModelFiles::from_dir(&base_dir)?;
    let report = fine_tune(&data, &out, &base, &tiny_train_config())?;
    assert_eq!(report.labels, vec!["goodbye".to_string(), "greeting".to_string()]);
    assert_eq!(report.eval_examples, 4);
    assert_eq!(report.train_examples, 16);
    assert!(report.epochs_run >= 1);

    let bundle = ArtifactBundle::new(&out);
    assert!(bundle.is_complete());
    assert!(bundle.weights_path().exists());
    assert!(bundle.onnx_data_path().exists());
    assert!(bundle.best_checkpoint_path().exists());
    assert_same_tensors(&bundle.weights_path(), &bundle.best_checkpoint_path());
    assert!(bundle.tokenizer_dir().join("tokenizer_config.json").exists());

    let config: serde_json::Value = serde_json::from_str(&fs::read_to_string(bundle.config_path())?)?;
    assert_eq!(config["id2label"]["1"], "greeting");
    assert_eq!(config["num_labels"], 2);
    let tokenizer: serde_json::Value = serde_json::from_str(&fs::read_to_string(bundle.tokenizer_path())?)?;
    assert_eq!(tokenizer["padding"]["pad_id"], 1);
    assert_eq!(LabelMap::load(bundle.labels_path())?.labels(), report.labels.as_slice());

    let classifier = IntentClassifier::builder()
        .with_bundle(&out)?
        .with_max_len(16)
        .build()?;
    assert!(classifier.uses_token_types());
    let prediction = classifier.predict("xin chào shop")?;
    assert!(report.labels.contains(&prediction.label));
    assert!(prediction.confidence >= 0.5 && prediction.confidence <= 1.0);
    for blank in ["", "   "] {
        let prediction = classifier.predict(blank)?;
        assert!(report.labels.contains(&prediction.label));
        assert_eq!(prediction.probabilities.len(), 2);
    }

    // candle forward over the same padded input
    let text = "tạm biệt bạn ơi";
    let onnx_logits = classifier.logits(text)?;

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = SequenceClassifier::new(&common::tiny_config(), 2, vb)?;
    varmap.load(bundle.weights_path())?;

    let encoded = InputEncoder::from_file(bundle.tokenizer_path(), 16)?.encode_fixed(text)?;
    let ids: Vec<u32> = encoded.input_ids.iter().map(|&v| v as u32).collect();
    let mask: Vec<u32> = encoded.attention_mask.iter().map(|&v| v as u32).collect();
    let ids = Tensor::from_vec(ids, (1, 16), &Device::Cpu)?;
    let mask = Tensor::from_vec(mask, (1, 16), &Device::Cpu)?;
    let candle_logits = model.forward(&ids, &mask, None, false)?.squeeze(0)?.to_vec1::<f32>()?;

    assert_eq!(onnx_logits.len(), candle_logits.len());
    for (a, b) in onnx_logits.iter().zip(&candle_logits) {
        assert!((a - b).abs() < 1e-3, "onnx {} vs candle {}", a, b);
    }
    Ok(())
}

#[test]
fn test_fine_tune_stops_early_and_exports_best_checkpoint() -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let dir = tempfile::tempdir()?;
    let base_dir = dir.path().join("base");
    fs::create_dir_all(&base_dir)?;
    common::write_base_model(&base_dir);
    let data = dir.path().join("train.jsonl");
    common::write_corpus(&data, 10);
    let out = dir.path().join("intent_llm");

    // a zero learning rate keeps eval accuracy flat, so only epoch 1 improves
    let config = TrainConfig {
        epochs: 6,
        learning_rate: 0.0,
        early_stopping_patience: 2,
        ..tiny_train_config()
    };
    let base = BaseModelFiles::from_dir(&base_dir)?;
    let report = fine_tune(&data, &out, &base, &config)?;
    assert_eq!(report.epochs_run, 3);
    assert!(report.epochs_run < config.epochs);
    assert_eq!(report.steps, 3 * report.train_examples.div_ceil(config.batch_size));

    let bundle = ArtifactBundle::new(&out);
    assert!(bundle.is_complete());
    assert_same_tensors(&bundle.weights_path(), &bundle.best_checkpoint_path());
    Ok(())
}

#[tokio::test]
async fn test_train_resolves_local_base_model() -> Result<(), Box<dyn std::error::Error>> {
    common::init();
    let dir = tempfile::tempdir()?;
    std::env::set_var("VI_INTENT_CACHE", dir.path().join("cache"));
    let base_dir = dir.path().join("base");
    fs::create_dir_all(&base_dir)?;
    common::write_base_model(&base_dir);
    let data = dir.path().join("train.jsonl");
    common::write_corpus(&data, 10);
    let out = dir.path().join("intent_llm");

    let config = TrainConfig {
        base_model: base_dir.to_string_lossy().into_owned(),
        epochs: 1,
        ..tiny_train_config()
    };
    let report = train(&data, &out, &config).await?;
    assert_eq!(report.epochs_run, 1);
    assert_eq!(report.bundle, out);
    assert!(ArtifactBundle::new(&out).is_complete());
    Ok(())
}

#[test]
fn test_fine_tune_rejects_unsplittable_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let base_dir = dir.path().join("base");
    fs::create_dir_all(&base_dir).unwrap();
    common::write_base_model(&base_dir);
    let data = dir.path().join("train.jsonl");
    fs::write(&data, "{\"text\": \"xin chào\", \"label\": \"greeting\"}\n").unwrap();

    let base = BaseModelFiles::from_dir(&base_dir).unwrap();
    let config = TrainConfig {
        eval_ratio: 0.9,
        ..tiny_train_config()
    };
    let err = fine_tune(&data, dir.path().join("out"), &base, &config).unwrap_err();
    assert!(matches!(err, vi_intent::TrainError::Split(_)));
}
