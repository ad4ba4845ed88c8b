use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::init::Init;
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};

use super::{Activation, EncoderConfig, EncoderError, EncoderKind};

/// Additive bias applied to attention scores of padded positions.
pub const ATTENTION_MASK_VALUE: f64 = -10000.0;

fn dropout(xs: &Tensor, p: f64, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        candle_nn::ops::dropout(xs, p as f32)
    } else {
        Ok(xs.clone())
    }
}

/// `(1 - mask) * -10000` shaped `[batch, 1, 1, seq]` for broadcasting over heads.
pub fn attention_bias(attention_mask: &Tensor) -> Result<Tensor> {
    attention_mask
        .to_dtype(DType::F32)?
        .unsqueeze(1)?
        .unsqueeze(1)?
        .affine(-ATTENTION_MASK_VALUE, ATTENTION_MASK_VALUE)
}

/// RoBERTa positions: running count of non-pad tokens offset by the pad id;
/// pad tokens keep the pad id itself.
pub fn roberta_position_ids(ids: &[u32], pad_id: u32) -> Vec<u32> {
    let mut seen = 0;
    ids.iter()
        .map(|&id| {
            if id == pad_id {
                pad_id
            } else {
                seen += 1;
                pad_id + seen
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn new(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(size, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(size, "bias", Init::Const(0.0))?,
            eps,
        })
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

struct Embeddings {
    word: Embedding,
    position: Embedding,
    token_type: Option<Embedding>,
    norm: LayerNorm,
    dropout: f64,
    kind: EncoderKind,
    pad_id: u32,
}

impl Embeddings {
    fn new(config: &EncoderConfig, kind: EncoderKind, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let token_type = if config.has_token_types() {
            Some(embedding(config.type_vocab_size, hidden, vb.pp("token_type_embeddings"))?)
        } else {
            None
        };
        Ok(Self {
            word: embedding(config.vocab_size, hidden, vb.pp("word_embeddings"))?,
            position: embedding(config.max_position_embeddings, hidden, vb.pp("position_embeddings"))?,
            token_type,
            norm: LayerNorm::new(hidden, config.layer_norm_eps, vb.pp("LayerNorm"))?,
            dropout: config.hidden_dropout_prob,
            kind,
            pad_id: config.pad_token_id,
        })
    }

    fn position_ids(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq) = input_ids.dims2()?;
        match self.kind {
            EncoderKind::Roberta => {
                let rows = input_ids.to_vec2::<u32>()?;
                let positions: Vec<u32> = rows
                    .iter()
                    .flat_map(|row| roberta_position_ids(row, self.pad_id))
                    .collect();
                Tensor::from_vec(positions, (batch, seq), input_ids.device())
            }
            EncoderKind::Bert => Tensor::arange(0u32, seq as u32, input_ids.device())?
                .unsqueeze(0)?
                .broadcast_as((batch, seq))?
                .contiguous(),
        }
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let positions = self.position_ids(input_ids)?;
        let mut xs = self
            .word
            .forward(input_ids)?
            .add(&self.position.forward(&positions)?)?;
        if let Some(token_type) = &self.token_type {
            let types = match token_type_ids {
                Some(types) => types.clone(),
                None => input_ids.zeros_like()?,
            };
            xs = xs.add(&token_type.forward(&types)?)?;
        }
        dropout(&self.norm.forward(&xs)?, self.dropout, train)
    }
}

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    norm: LayerNorm,
    heads: usize,
    head_dim: usize,
    attention_dropout: f64,
    hidden_dropout: f64,
}

impl SelfAttention {
    fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let attn = vb.pp("self");
        let out = vb.pp("output");
        Ok(Self {
            query: linear(hidden, hidden, attn.pp("query"))?,
            key: linear(hidden, hidden, attn.pp("key"))?,
            value: linear(hidden, hidden, attn.pp("value"))?,
            output: linear(hidden, hidden, out.pp("dense"))?,
            norm: LayerNorm::new(hidden, config.layer_norm_eps, out.pp("LayerNorm"))?,
            heads: config.num_attention_heads,
            head_dim: config.head_dim(),
            attention_dropout: config.attention_probs_dropout_prob,
            hidden_dropout: config.hidden_dropout_prob,
        })
    }

    fn forward(&self, hidden: &Tensor, bias: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq, size) = hidden.dims3()?;
        let split = |xs: Tensor| -> Result<Tensor> {
            xs.reshape((batch, seq, self.heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(self.query.forward(hidden)?)?;
        let k = split(self.key.forward(hidden)?)?;
        let v = split(self.value.forward(hidden)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?.broadcast_add(bias)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let probs = dropout(&probs, self.attention_dropout, train)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, size))?;
        let out = dropout(&self.output.forward(&context)?, self.hidden_dropout, train)?;
        self.norm.forward(&(out + hidden)?)
    }
}

struct Layer {
    attention: SelfAttention,
    intermediate: Linear,
    output: Linear,
    norm: LayerNorm,
    activation: Activation,
    dropout: f64,
}

impl Layer {
    fn new(config: &EncoderConfig, activation: Activation, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            attention: SelfAttention::new(config, vb.pp("attention"))?,
            intermediate: linear(hidden, config.intermediate_size, vb.pp("intermediate").pp("dense"))?,
            output: linear(config.intermediate_size, hidden, vb.pp("output").pp("dense"))?,
            norm: LayerNorm::new(hidden, config.layer_norm_eps, vb.pp("output").pp("LayerNorm"))?,
            activation,
            dropout: config.hidden_dropout_prob,
        })
    }

    fn forward(&self, hidden: &Tensor, bias: &Tensor, train: bool) -> Result<Tensor> {
        let attended = self.attention.forward(hidden, bias, train)?;
        let inner = self.intermediate.forward(&attended)?;
        let inner = match self.activation {
            Activation::GeluErf => inner.gelu_erf()?,
            Activation::GeluTanh => inner.gelu()?,
        };
        let out = dropout(&self.output.forward(&inner)?, self.dropout, train)?;
        self.norm.forward(&(out + attended)?)
    }
}

/// Encoder body plus classification head over the first token.
pub struct SequenceClassifier {
    embeddings: Embeddings,
    layers: Vec<Layer>,
    dense: Linear,
    out_proj: Linear,
    kind: EncoderKind,
    dropout: f64,
    num_labels: usize,
}

impl SequenceClassifier {
    pub fn new(config: &EncoderConfig, num_labels: usize, vb: VarBuilder) -> std::result::Result<Self, EncoderError> {
        config.validate()?;
        let kind = config.kind()?;
        let activation = config.activation()?;
        let body = vb.pp(kind.prefix());

        let embeddings = Embeddings::new(config, kind, body.pp("embeddings"))?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| Layer::new(config, activation, body.pp("encoder").pp("layer").pp(i)))
            .collect::<Result<Vec<_>>>()?;

        let hidden = config.hidden_size;
        Ok(Self {
            embeddings,
            layers,
            dense: linear(hidden, hidden, vb.pp(kind.head_dense()))?,
            out_proj: linear(hidden, num_labels, vb.pp(kind.head_out()))?,
            kind,
            dropout: config.hidden_dropout_prob,
            num_labels,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Returns logits of shape `[batch, num_labels]`.
    ///
    /// `input_ids` and `attention_mask` are `u32` tensors of shape
    /// `[batch, seq]`. Dropout is active only when `train` is set.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let bias = attention_bias(attention_mask)?;
        let mut hidden = self.embeddings.forward(input_ids, token_type_ids, train)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &bias, train)?;
        }

        let first = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = match self.kind {
            EncoderKind::Roberta => {
                let xs = dropout(&first, self.dropout, train)?;
                self.dense.forward(&xs)?.tanh()?
            }
            EncoderKind::Bert => self.dense.forward(&first)?.tanh()?,
        };
        let pooled = dropout(&pooled, self.dropout, train)?;
        self.out_proj.forward(&pooled)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    pub(crate) fn tiny_config(model_type: &str) -> EncoderConfig {
        EncoderConfig {
            model_type: model_type.to_string(),
            vocab_size: 32,
            hidden_size: 8,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 16,
            hidden_act: "gelu".to_string(),
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
            max_position_embeddings: 40,
            type_vocab_size: 1,
            layer_norm_eps: 1e-5,
            pad_token_id: 1,
        }
    }

    #[test]
    fn test_roberta_positions() {
        assert_eq!(roberta_position_ids(&[0, 5, 6, 2, 1, 1], 1), vec![2, 3, 4, 5, 1, 1]);
    }

    #[test]
    fn test_attention_bias() {
        let mask = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu).unwrap();
        let bias = attention_bias(&mask).unwrap();
        assert_eq!(bias.dims(), &[1, 1, 1, 3]);
        let values = bias.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![0.0, 0.0, -10000.0]);
    }

    #[test]
    fn test_forward_shape_and_parameter_names() {
        for model_type in ["xlm-roberta", "bert"] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            let model = SequenceClassifier::new(&tiny_config(model_type), 3, vb).unwrap();

            let ids = Tensor::new(&[[0u32, 7, 9, 2], [0, 4, 2, 1]], &Device::Cpu).unwrap();
            let mask = Tensor::new(&[[1u32, 1, 1, 1], [1, 1, 1, 0]], &Device::Cpu).unwrap();
            let logits = model.forward(&ids, &mask, None, false).unwrap();
            assert_eq!(logits.dims(), &[2, 3]);

            let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
            let kind = EncoderKind::from_model_type(model_type).unwrap();
            assert!(names.contains(&format!("{}.embeddings.word_embeddings.weight", kind.prefix())));
            assert!(names.contains(&format!(
                "{}.encoder.layer.1.attention.self.query.weight",
                kind.prefix()
            )));
            assert!(names.contains(&format!("{}.bias", kind.head_out())));
        }
    }

    #[test]
    fn test_padding_does_not_change_logits() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = SequenceClassifier::new(&tiny_config("xlm-roberta"), 2, vb).unwrap();

        let short_ids = Tensor::new(&[[0u32, 7, 2]], &Device::Cpu).unwrap();
        let short_mask = Tensor::new(&[[1u32, 1, 1]], &Device::Cpu).unwrap();
        let padded_ids = Tensor::new(&[[0u32, 7, 2, 1, 1]], &Device::Cpu).unwrap();
        let padded_mask = Tensor::new(&[[1u32, 1, 1, 0, 0]], &Device::Cpu).unwrap();

        let a = model.forward(&short_ids, &short_mask, None, false).unwrap();
        let b = model.forward(&padded_ids, &padded_mask, None, false).unwrap();
        let diff = (a - b).unwrap().abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(diff < 1e-4, "diff {}", diff);
    }
}
