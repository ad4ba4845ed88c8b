//! Fine-tuning of a pretrained encoder on an intent corpus.
//!
//! [`fine_tune`] runs the whole pipeline synchronously on CPU: corpus
//! loading, rare-class oversampling, the stratified split, AdamW training
//! with the composite focal/label-smoothing loss, best-checkpoint selection
//! with early stopping, and finally writing the artifact bundle including the
//! ONNX graph. [`train`] resolves the base model first (possibly downloading
//! it) and then calls [`fine_tune`].

pub mod batch;
pub mod loss;
pub mod sampling;
pub mod schedule;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokenizers::{PaddingParams, Tokenizer};

use crate::bundle::ArtifactBundle;
use crate::corpus::{label_counts, load_training_corpus, CorpusError};
use crate::export::{export_onnx, ExportError};
use crate::labels::{LabelMap, LabelMapError};
use crate::model::{load_pretrained, save_bundle_config, EncoderConfig, EncoderError, SequenceClassifier};
use crate::model_manager::{BaseModelFiles, ModelError, ModelManager};
use batch::{collate, encode_examples, prepare_tokenizer, EncodedExample};
use loss::{composite_loss, LossConfig};
use sampling::{class_weights, oversample_min_classes, stratified_split};
use schedule::{EarlyStopping, LinearWarmup};

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Labels(#[from] LabelMapError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("Base model unavailable: {0}")]
    BaseModel(#[from] ModelError),
    #[error("Cannot split corpus: {0}")]
    Split(String),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
    #[error("Invalid training config: {0}")]
    Config(String),
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("Training task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Local directory or Hugging Face id of the base encoder
    pub base_model: String,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub max_len: usize,
    /// Exponent of the inverse-frequency class weights
    pub weight_power: f64,
    pub eval_ratio: f64,
    pub focal_gamma: f64,
    pub label_smoothing: f64,
    pub warmup_ratio: f64,
    pub seed: u64,
    pub logging_steps: usize,
    /// Evaluations without improvement before stopping, 0 disables
    pub early_stopping_patience: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            base_model: "xlm-roberta-large".to_string(),
            epochs: 8,
            learning_rate: 2e-5,
            batch_size: 16,
            max_len: 128,
            weight_power: 0.5,
            eval_ratio: 0.1,
            focal_gamma: 2.0,
            label_smoothing: 0.1,
            warmup_ratio: 0.06,
            seed: 42,
            logging_steps: 50,
            early_stopping_patience: 2,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.epochs == 0 {
            return Err(TrainError::Config("epochs must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(TrainError::Config("batch size must be positive".into()));
        }
        if self.max_len < 2 {
            return Err(TrainError::Config(format!("max_len {} is too short", self.max_len)));
        }
        if !(self.eval_ratio > 0.0 && self.eval_ratio < 1.0) {
            return Err(TrainError::Config(format!(
                "eval_ratio {} must be in (0, 1)",
                self.eval_ratio
            )));
        }
        if !(0.0..1.0).contains(&self.label_smoothing) {
            return Err(TrainError::Config(format!(
                "label smoothing {} must be in [0, 1)",
                self.label_smoothing
            )));
        }
        Ok(())
    }

    fn loss(&self) -> LossConfig {
        LossConfig {
            gamma: self.focal_gamma,
            smoothing: self.label_smoothing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub labels: Vec<String>,
    pub train_examples: usize,
    pub eval_examples: usize,
    pub epochs_run: usize,
    pub steps: usize,
    pub best_accuracy: f64,
    pub bundle: PathBuf,
}

/// Resolves `config.base_model` and fine-tunes it.
///
/// Only the download runs on the async runtime; training itself goes to the
/// blocking pool.
pub async fn train(
    data: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    config: &TrainConfig,
) -> Result<TrainReport, TrainError> {
    config.validate()?;
    let manager = ModelManager::new_default()?;
    let base = manager.resolve(&config.base_model).await?;

    let data = data.as_ref().to_path_buf();
    let out_dir = out_dir.as_ref().to_path_buf();
    let config = config.clone();
    tokio::task::spawn_blocking(move || fine_tune(data, out_dir, &base, &config)).await?
}

fn accuracy(
    model: &SequenceClassifier,
    examples: &[EncodedExample],
    pad_id: u32,
    batch_size: usize,
    device: &Device,
) -> Result<f64, TrainError> {
    if examples.is_empty() {
        return Ok(0.0);
    }
    let mut correct = 0f64;
    for chunk in examples.chunks(batch_size) {
        let refs: Vec<&EncodedExample> = chunk.iter().collect();
        let batch = collate(&refs, pad_id, device)?;
        let logits = model.forward(
            &batch.input_ids,
            &batch.attention_mask,
            Some(&batch.token_type_ids),
            false,
        )?;
        let hits = logits
            .argmax(D::Minus1)?
            .eq(&batch.labels)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        correct += hits as f64;
    }
    Ok(correct / examples.len() as f64)
}

/// Saves the tokenizer with fixed padding and truncation, plus the base
/// model's companion tokenizer files.
fn save_tokenizer(
    tokenizer: &mut Tokenizer,
    base: &BaseModelFiles,
    pad_id: u32,
    max_len: usize,
    bundle: &ArtifactBundle,
) -> Result<(), TrainError> {
    prepare_tokenizer(tokenizer, max_len)?;
    let pad_token = tokenizer
        .id_to_token(pad_id)
        .unwrap_or_else(|| "<pad>".to_string());
    tokenizer.with_padding(Some(PaddingParams {
        pad_id,
        pad_token,
        ..Default::default()
    }));

    let dir = bundle.tokenizer_dir();
    fs::create_dir_all(&dir)?;
    tokenizer
        .save(bundle.tokenizer_path(), true)
        .map_err(|e| TrainError::Tokenizer(e.to_string()))?;
    for extra in &base.extras {
        if let Some(name) = extra.file_name() {
            fs::copy(extra, dir.join(name))?;
        }
    }
    Ok(())
}

/// Trains a classifier on the corpus at `data` and writes the bundle to
/// `out_dir`.
pub fn fine_tune(
    data: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    base: &BaseModelFiles,
    config: &TrainConfig,
) -> Result<TrainReport, TrainError> {
    config.validate()?;
    let bundle = ArtifactBundle::new(out_dir.as_ref());
    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut corpus = load_training_corpus(data)?;
    info!("Loaded {} examples", corpus.len());
    if oversample_min_classes(&mut corpus) {
        info!("Corpus grown to {} examples", corpus.len());
    }
    let labels = LabelMap::from_labels(corpus.iter().map(|e| e.label.as_str()))?;
    for (label, count) in label_counts(&corpus) {
        debug!("  {}: {}", label, count);
    }

    let (train_set, eval_set) = stratified_split(&corpus, &labels, config.eval_ratio, &mut rng)?;
    info!(
        "{} labels, {} train / {} eval examples",
        labels.len(),
        train_set.len(),
        eval_set.len()
    );
    let weights = class_weights(&train_set, &labels, config.weight_power);
    let weights = Tensor::new(weights.as_slice(), &device)?;

    let encoder_config = EncoderConfig::from_file(&base.config)?;
    let kind = encoder_config.kind()?;
    let pad_id = encoder_config.pad_token_id;

    let mut tokenizer = Tokenizer::from_file(&base.tokenizer).map_err(|e| TrainError::Tokenizer(e.to_string()))?;
    prepare_tokenizer(&mut tokenizer, config.max_len)?;
    let train_encoded = encode_examples(&tokenizer, &train_set, &labels)?;
    let eval_encoded = encode_examples(&tokenizer, &eval_set, &labels)?;

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = SequenceClassifier::new(&encoder_config, labels.len(), vb)?;
    load_pretrained(&varmap, &base.weights, kind, &mut rng)?;

    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;
    let steps_per_epoch = train_encoded.len().div_ceil(config.batch_size);
    let schedule = LinearWarmup::new(config.learning_rate, steps_per_epoch * config.epochs, config.warmup_ratio);
    let mut stopper = EarlyStopping::new(config.early_stopping_patience);
    let loss_config = config.loss();

    fs::create_dir_all(bundle.checkpoint_dir())?;
    let mut order: Vec<usize> = (0..train_encoded.len()).collect();
    let mut step = 0;
    let mut epochs_run = 0;
    for epoch in 1..=config.epochs {
        order.shuffle(&mut rng);
        let mut running = 0f64;
        let mut since_log = 0;
        for chunk in order.chunks(config.batch_size) {
            let examples: Vec<&EncodedExample> = chunk.iter().map(|&i| &train_encoded[i]).collect();
            let batch = collate(&examples, pad_id, &device)?;
            let logits = model.forward(
                &batch.input_ids,
                &batch.attention_mask,
                Some(&batch.token_type_ids),
                true,
            )?;
            let loss = composite_loss(&logits, &batch.labels, Some(&weights), &loss_config)?;

            optimizer.set_learning_rate(schedule.lr_at(step));
            optimizer.backward_step(&loss)?;
            step += 1;

            running += loss.to_scalar::<f32>()? as f64;
            since_log += 1;
            if config.logging_steps > 0 && step % config.logging_steps == 0 {
                info!(
                    "epoch {} step {}: loss {:.4}, lr {:.2e}",
                    epoch,
                    step,
                    running / since_log as f64,
                    schedule.lr_at(step)
                );
                running = 0.0;
                since_log = 0;
            }
        }
        epochs_run = epoch;

        let acc = accuracy(&model, &eval_encoded, pad_id, config.batch_size, &device)?;
        info!("epoch {}: eval accuracy {:.4}", epoch, acc);
        if stopper.observe(acc) {
            varmap.save(bundle.best_checkpoint_path())?;
            debug!("Checkpoint saved to {:?}", bundle.best_checkpoint_path());
        } else if stopper.should_stop() {
            info!("No improvement for {} evaluations, stopping", config.early_stopping_patience);
            break;
        }
    }

    varmap.load(bundle.best_checkpoint_path())?;
    let best_accuracy = stopper.best().unwrap_or(0.0);
    info!("Restored best checkpoint (accuracy {:.4})", best_accuracy);

    varmap.save(bundle.weights_path())?;
    save_bundle_config(&base.config, &labels, kind, bundle.config_path())?;
    save_tokenizer(&mut tokenizer, base, pad_id, config.max_len, &bundle)?;
    labels.save(bundle.labels_path())?;
    export_onnx(&varmap, &encoder_config, labels.len(), &bundle)?;

    Ok(TrainReport {
        labels: labels.labels().to_vec(),
        train_examples: train_set.len(),
        eval_examples: eval_set.len(),
        epochs_run,
        steps: step,
        best_accuracy,
        bundle: bundle.root().to_path_buf(),
    })
}
