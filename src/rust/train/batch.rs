use candle_core::{Device, Result, Tensor};
use tokenizers::{Tokenizer, TruncationParams};

use super::TrainError;
use crate::corpus::LabeledExample;
use crate::labels::LabelMap;

/// A tokenized example, unpadded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedExample {
    pub ids: Vec<u32>,
    pub type_ids: Vec<u32>,
    pub label: u32,
}

/// Tensors of one padded batch, all `u32`.
#[derive(Debug)]
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
    pub labels: Tensor,
}

/// Configures truncation to `max_len` and disables padding so that batches
/// can be padded dynamically.
pub fn prepare_tokenizer(tokenizer: &mut Tokenizer, max_len: usize) -> std::result::Result<(), TrainError> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_len,
            ..Default::default()
        }))
        .map_err(|e| TrainError::Tokenizer(e.to_string()))?;
    tokenizer.with_padding(None);
    Ok(())
}

pub fn encode_examples(
    tokenizer: &Tokenizer,
    examples: &[LabeledExample],
    labels: &LabelMap,
) -> std::result::Result<Vec<EncodedExample>, TrainError> {
    let texts: Vec<&str> = examples.iter().map(|e| e.text.as_str()).collect();
    let encodings = tokenizer
        .encode_batch(texts, true)
        .map_err(|e| TrainError::Tokenizer(e.to_string()))?;

    examples
        .iter()
        .zip(encodings)
        .map(|(example, encoding)| {
            let label = labels
                .id(&example.label)
                .ok_or_else(|| TrainError::Config(format!("unknown label '{}'", example.label)))?;
            Ok(EncodedExample {
                ids: encoding.get_ids().to_vec(),
                type_ids: encoding.get_type_ids().to_vec(),
                label: label as u32,
            })
        })
        .collect()
}

/// Pads every example to the longest one in the batch.
pub fn collate(examples: &[&EncodedExample], pad_id: u32, device: &Device) -> Result<Batch> {
    let batch = examples.len();
    let seq = examples.iter().map(|e| e.ids.len()).max().unwrap_or(0).max(1);

    let mut ids = Vec::with_capacity(batch * seq);
    let mut mask = Vec::with_capacity(batch * seq);
    let mut types = Vec::with_capacity(batch * seq);
    for example in examples {
        let pad = seq - example.ids.len();
        ids.extend_from_slice(&example.ids);
        ids.extend(std::iter::repeat(pad_id).take(pad));
        mask.extend(std::iter::repeat(1u32).take(example.ids.len()));
        mask.extend(std::iter::repeat(0u32).take(pad));
        types.extend_from_slice(&example.type_ids);
        types.extend(std::iter::repeat(0u32).take(seq - example.type_ids.len()));
    }
    let labels: Vec<u32> = examples.iter().map(|e| e.label).collect();

    Ok(Batch {
        input_ids: Tensor::from_vec(ids, (batch, seq), device)?,
        attention_mask: Tensor::from_vec(mask, (batch, seq), device)?,
        token_type_ids: Tensor::from_vec(types, (batch, seq), device)?,
        labels: Tensor::from_vec(labels, batch, device)?,
    })
}
