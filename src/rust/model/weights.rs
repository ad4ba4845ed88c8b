use std::collections::HashSet;
use std::fs;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Value};

use super::{EncoderError, EncoderKind};
use crate::labels::LabelMap;

/// Standard deviation of freshly initialized weights.
pub const INIT_STD: f64 = 0.02;

#[derive(Debug, Default)]
pub struct LoadReport {
    /// Parameters copied from the checkpoint
    pub loaded: usize,
    /// Parameters absent from the checkpoint, initialized from the RNG
    pub initialized: Vec<String>,
    /// Checkpoint tensors the model has no use for (MLM head, ...)
    pub unused: Vec<String>,
}

/// Checkpoint keys that may hold the parameter `name`: the exact name, the
/// name without the encoder prefix (bare base-model exports) and the legacy
/// `gamma`/`beta` spelling of layer-norm parameters.
fn candidate_keys(name: &str, kind: EncoderKind) -> Vec<String> {
    let mut bases = vec![name.to_string()];
    if let Some(stripped) = name.strip_prefix(&format!("{}.", kind.prefix())) {
        bases.push(stripped.to_string());
    }

    let mut keys = bases.clone();
    for base in &bases {
        if let Some(stem) = base.strip_suffix("LayerNorm.weight") {
            keys.push(format!("{}LayerNorm.gamma", stem));
        } else if let Some(stem) = base.strip_suffix("LayerNorm.bias") {
            keys.push(format!("{}LayerNorm.beta", stem));
        }
    }
    keys
}

fn init_tensor(name: &str, dims: &[usize], rng: &mut StdRng) -> candle_core::Result<Tensor> {
    if name.ends_with("LayerNorm.weight") {
        return Tensor::ones(dims, DType::F32, &Device::Cpu);
    }
    if name.ends_with(".bias") {
        return Tensor::zeros(dims, DType::F32, &Device::Cpu);
    }
    // uniform(-a, a) has std a / sqrt(3)
    let bound = INIT_STD * 3f64.sqrt();
    let count: usize = dims.iter().product();
    let values: Vec<f32> = (0..count)
        .map(|_| rng.random_range(-bound..bound) as f32)
        .collect();
    Tensor::from_vec(values, dims, &Device::Cpu)
}

/// Copies pretrained tensors into every variable of `varmap`.
///
/// Variables are visited in name order so that the ones initialized from
/// `rng` (typically the classification head) are reproducible for a seed.
pub fn load_pretrained(
    varmap: &VarMap,
    path: impl AsRef<Path>,
    kind: EncoderKind,
    rng: &mut StdRng,
) -> Result<LoadReport, EncoderError> {
    let path = path.as_ref();
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
    let data = varmap
        .data()
        .lock()
        .map_err(|_| EncoderError::Invalid("parameter store lock poisoned".to_string()))?;

    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut report = LoadReport::default();
    let mut used = HashSet::new();
    for name in names {
        let var = &data[name];
        let found = candidate_keys(name, kind)
            .into_iter()
            .find(|key| tensors.contains_key(key));
        match found {
            Some(key) => {
                let tensor = &tensors[&key];
                if tensor.dims() != var.dims() {
                    return Err(EncoderError::ShapeMismatch {
                        name: name.clone(),
                        checkpoint: tensor.dims().to_vec(),
                        model: var.dims().to_vec(),
                    });
                }
                var.set(&tensor.to_dtype(var.dtype())?)?;
                used.insert(key);
                report.loaded += 1;
            }
            None => {
                debug!("Initializing {} {:?}", name, var.dims());
                var.set(&init_tensor(name, var.dims(), rng)?)?;
                report.initialized.push(name.clone());
            }
        }
    }

    report.unused = tensors.keys().filter(|k| !used.contains(*k)).cloned().collect();
    report.unused.sort();
    info!(
        "Loaded {} tensors from {}, initialized {}, skipped {}",
        report.loaded,
        path.display(),
        report.initialized.len(),
        report.unused.len()
    );
    Ok(report)
}

/// Writes the base `config.json` back out with the label maps and the
/// sequence-classification architecture filled in.
pub fn save_bundle_config(
    base_config: impl AsRef<Path>,
    labels: &LabelMap,
    kind: EncoderKind,
    out: impl AsRef<Path>,
) -> Result<(), EncoderError> {
    let text = fs::read_to_string(base_config)?;
    let mut config: Value = serde_json::from_str(&text)?;
    let Some(fields) = config.as_object_mut() else {
        return Err(EncoderError::Invalid("config.json is not an object".to_string()));
    };

    let model_type = fields
        .get("model_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    fields.insert("architectures".into(), json!([kind.architecture(&model_type)]));
    fields.insert("id2label".into(), json!(labels.id2label()));
    fields.insert("label2id".into(), json!(labels.label2id()));
    fields.insert("num_labels".into(), json!(labels.len()));
    fields.insert("problem_type".into(), json!("single_label_classification"));

    fs::write(out, serde_json::to_string_pretty(&config)?)?;
    Ok(())
}
