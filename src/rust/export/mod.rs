//! ONNX export of a trained [`SequenceClassifier`](crate::model::SequenceClassifier).
//!
//! The graph is assembled node by node from the parameters in the `VarMap`,
//! mirroring the candle forward pass in inference mode. Parameters are
//! written to an external data file next to `model.onnx`; small constants
//! (shapes, axes, scalars) stay inline.

pub mod proto;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use candle_core::{DType, Tensor, Var};
use candle_nn::VarMap;
use log::info;
use prost::Message;

use crate::bundle::{ArtifactBundle, ONNX_DATA_FILE};
use crate::model::{Activation, EncoderConfig, EncoderError, EncoderKind, ATTENTION_MASK_VALUE};
use proto::{
    tensor_shape_proto::{dimension, Dimension},
    type_proto, AttributeProto, AttributeType, DataLocation, DataType, GraphProto, ModelProto, NodeProto,
    OperatorSetIdProto, StringStringEntryProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};

pub const OPSET_VERSION: i64 = 17;
pub const IR_VERSION: i64 = 8;
const EXTERNAL_ALIGNMENT: usize = 4096;

pub const INPUT_IDS: &str = "input_ids";
pub const ATTENTION_MASK: &str = "attention_mask";
pub const TOKEN_TYPE_IDS: &str = "token_type_ids";
pub const LOGITS: &str = "logits";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Parameter '{0}' not found")]
    MissingParameter(String),
    #[error("Parameter store lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

fn attr_int(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        i: Some(value),
        r#type: AttributeType::Int as i32,
        ..Default::default()
    }
}

fn attr_float(name: &str, value: f32) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        f: Some(value),
        r#type: AttributeType::Float as i32,
        ..Default::default()
    }
}

fn attr_ints(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        ints: values.to_vec(),
        r#type: AttributeType::Ints as i32,
        ..Default::default()
    }
}

enum Dim {
    Fixed(i64),
    Symbolic(&'static str),
}

fn value_info(name: &str, elem_type: DataType, dims: &[Dim]) -> ValueInfoProto {
    let dim = dims
        .iter()
        .map(|d| Dimension {
            value: Some(match d {
                Dim::Fixed(v) => dimension::Value::DimValue(*v),
                Dim::Symbolic(p) => dimension::Value::DimParam(p.to_string()),
            }),
        })
        .collect();
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: elem_type as i32,
                shape: Some(TensorShapeProto { dim }),
            })),
        }),
    }
}

struct GraphBuilder<'a> {
    params: &'a HashMap<String, Var>,
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
    external: Vec<u8>,
    counter: usize,
}

impl<'a> GraphBuilder<'a> {
    fn new(params: &'a HashMap<String, Var>) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            initializers: Vec::new(),
            external: Vec::new(),
            counter: 0,
        }
    }

    fn fresh(&mut self, hint: &str) -> String {
        self.counter += 1;
        format!("{}_{}", hint, self.counter)
    }

    fn node_into(&mut self, op: &str, inputs: &[&str], attribute: Vec<AttributeProto>, output: &str) {
        self.nodes.push(NodeProto {
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: vec![output.to_string()],
            name: format!("{}_{}", op, self.nodes.len()),
            op_type: op.to_string(),
            attribute,
            domain: String::new(),
        });
    }

    fn node(&mut self, op: &str, inputs: &[&str], attribute: Vec<AttributeProto>) -> String {
        let output = self.fresh(op);
        self.node_into(op, inputs, attribute, &output);
        output
    }

    fn op(&mut self, op: &str, inputs: &[&str]) -> String {
        self.node(op, inputs, Vec::new())
    }

    fn inline(&mut self, hint: &str, data_type: DataType, dims: &[i64], raw_data: Vec<u8>) -> String {
        let name = self.fresh(hint);
        self.initializers.push(TensorProto {
            dims: dims.to_vec(),
            data_type: data_type as i32,
            name: name.clone(),
            raw_data,
            ..Default::default()
        });
        name
    }

    fn const_i64(&mut self, values: &[i64], dims: &[i64]) -> String {
        let raw = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.inline("const_i64", DataType::Int64, dims, raw)
    }

    fn scalar_i64(&mut self, value: i64) -> String {
        self.const_i64(&[value], &[])
    }

    fn scalar_f32(&mut self, value: f32) -> String {
        self.inline("const_f32", DataType::Float, &[], value.to_le_bytes().to_vec())
    }

    /// Appends `tensor` to the external data blob and registers it as an
    /// initializer named `name`.
    fn external(&mut self, name: &str, tensor: &Tensor) -> Result<String, ExportError> {
        let values = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let padding = (EXTERNAL_ALIGNMENT - self.external.len() % EXTERNAL_ALIGNMENT) % EXTERNAL_ALIGNMENT;
        self.external.resize(self.external.len() + padding, 0);
        let offset = self.external.len();
        self.external.extend(values.iter().flat_map(|v| v.to_le_bytes()));
        let length = self.external.len() - offset;

        let entry = |key: &str, value: String| StringStringEntryProto {
            key: key.to_string(),
            value,
        };
        self.initializers.push(TensorProto {
            dims: tensor.dims().iter().map(|&d| d as i64).collect(),
            data_type: DataType::Float as i32,
            name: name.to_string(),
            external_data: vec![
                entry("location", ONNX_DATA_FILE.to_string()),
                entry("offset", offset.to_string()),
                entry("length", length.to_string()),
            ],
            data_location: DataLocation::External as i32,
            ..Default::default()
        });
        Ok(name.to_string())
    }

    fn param(&self, name: &str) -> Result<Tensor, ExportError> {
        self.params
            .get(name)
            .map(|var| var.as_tensor().clone())
            .ok_or_else(|| ExportError::MissingParameter(name.to_string()))
    }

    fn weight(&mut self, name: &str) -> Result<String, ExportError> {
        let tensor = self.param(name)?;
        self.external(name, &tensor)
    }

    /// `x @ W^T + b` with the weight stored pre-transposed.
    fn linear(&mut self, prefix: &str, input: &str) -> Result<String, ExportError> {
        let weight = self.param(&format!("{}.weight", prefix))?.t()?.contiguous()?;
        let weight = self.external(&format!("{}.weight_t", prefix), &weight)?;
        let bias = self.weight(&format!("{}.bias", prefix))?;
        let product = self.op("MatMul", &[input, &weight]);
        Ok(self.op("Add", &[&product, &bias]))
    }

    fn layer_norm(&mut self, prefix: &str, input: &str, eps: f64) -> Result<String, ExportError> {
        let scale = self.weight(&format!("{}.weight", prefix))?;
        let bias = self.weight(&format!("{}.bias", prefix))?;
        Ok(self.node(
            "LayerNormalization",
            &[input, &scale, &bias],
            vec![attr_int("axis", -1), attr_float("epsilon", eps as f32)],
        ))
    }

    fn gelu(&mut self, input: &str, activation: Activation) -> String {
        match activation {
            Activation::GeluErf => {
                let inv_sqrt2 = self.scalar_f32(std::f32::consts::FRAC_1_SQRT_2);
                let scaled = self.op("Mul", &[input, &inv_sqrt2]);
                let erf = self.op("Erf", &[&scaled]);
                let one = self.scalar_f32(1.0);
                let shifted = self.op("Add", &[&erf, &one]);
                let product = self.op("Mul", &[input, &shifted]);
                let half = self.scalar_f32(0.5);
                self.op("Mul", &[&product, &half])
            }
            Activation::GeluTanh => {
                let square = self.op("Mul", &[input, input]);
                let cube = self.op("Mul", &[&square, input]);
                let coeff = self.scalar_f32(0.044715);
                let cubic = self.op("Mul", &[&cube, &coeff]);
                let inner = self.op("Add", &[input, &cubic]);
                let sqrt_2_pi = self.scalar_f32((2.0 / std::f32::consts::PI).sqrt());
                let scaled = self.op("Mul", &[&inner, &sqrt_2_pi]);
                let tanh = self.op("Tanh", &[&scaled]);
                let one = self.scalar_f32(1.0);
                let shifted = self.op("Add", &[&tanh, &one]);
                let product = self.op("Mul", &[input, &shifted]);
                let half = self.scalar_f32(0.5);
                self.op("Mul", &[&product, &half])
            }
        }
    }

    fn position_ids(&mut self, kind: EncoderKind, pad_id: u32) -> String {
        match kind {
            EncoderKind::Roberta => {
                let pad = self.scalar_i64(pad_id as i64);
                let is_pad = self.op("Equal", &[INPUT_IDS, &pad]);
                let not_pad = self.op("Not", &[&is_pad]);
                let mask = self.node("Cast", &[&not_pad], vec![attr_int("to", DataType::Int64 as i64)]);
                let axis = self.scalar_i64(1);
                let counts = self.op("CumSum", &[&mask, &axis]);
                let masked = self.op("Mul", &[&counts, &mask]);
                self.op("Add", &[&masked, &pad])
            }
            EncoderKind::Bert => {
                let shape = self.op("Shape", &[INPUT_IDS]);
                let one = self.scalar_i64(1);
                let seq = self.node("Gather", &[&shape, &one], vec![attr_int("axis", 0)]);
                let zero = self.scalar_i64(0);
                let range = self.op("Range", &[&zero, &seq, &one]);
                let axes = self.const_i64(&[0], &[1]);
                self.op("Unsqueeze", &[&range, &axes])
            }
        }
    }

    fn embeddings(&mut self, config: &EncoderConfig, kind: EncoderKind) -> Result<String, ExportError> {
        let p = format!("{}.embeddings", kind.prefix());
        let word_table = self.weight(&format!("{}.word_embeddings.weight", p))?;
        let words = self.node("Gather", &[&word_table, INPUT_IDS], vec![attr_int("axis", 0)]);

        let positions = self.position_ids(kind, config.pad_token_id);
        let position_table = self.weight(&format!("{}.position_embeddings.weight", p))?;
        let position_emb = self.node("Gather", &[&position_table, &positions], vec![attr_int("axis", 0)]);
        let mut sum = self.op("Add", &[&words, &position_emb]);

        if config.has_token_types() {
            let type_table = self.weight(&format!("{}.token_type_embeddings.weight", p))?;
            let type_emb = self.node("Gather", &[&type_table, TOKEN_TYPE_IDS], vec![attr_int("axis", 0)]);
            sum = self.op("Add", &[&sum, &type_emb]);
        }
        self.layer_norm(&format!("{}.LayerNorm", p), &sum, config.layer_norm_eps)
    }

    /// `(1 - mask) * -10000` as `[batch, 1, 1, seq]` float.
    fn mask_bias(&mut self) -> String {
        let mask = self.node("Cast", &[ATTENTION_MASK], vec![attr_int("to", DataType::Float as i64)]);
        let axes = self.const_i64(&[1, 2], &[2]);
        let expanded = self.op("Unsqueeze", &[&mask, &axes]);
        let one = self.scalar_f32(1.0);
        let inverted = self.op("Sub", &[&one, &expanded]);
        let fill = self.scalar_f32(ATTENTION_MASK_VALUE as f32);
        self.op("Mul", &[&inverted, &fill])
    }

    fn split_heads(&mut self, input: &str, heads: usize, head_dim: usize, perm: &[i64]) -> String {
        let shape = self.const_i64(&[0, 0, heads as i64, head_dim as i64], &[4]);
        let reshaped = self.op("Reshape", &[input, &shape]);
        self.node("Transpose", &[&reshaped], vec![attr_ints("perm", perm)])
    }

    fn layer(
        &mut self,
        config: &EncoderConfig,
        activation: Activation,
        prefix: &str,
        hidden: &str,
        bias: &str,
    ) -> Result<String, ExportError> {
        let heads = config.num_attention_heads;
        let head_dim = config.head_dim();
        let eps = config.layer_norm_eps;

        let q = self.linear(&format!("{}.attention.self.query", prefix), hidden)?;
        let k = self.linear(&format!("{}.attention.self.key", prefix), hidden)?;
        let v = self.linear(&format!("{}.attention.self.value", prefix), hidden)?;
        let q = self.split_heads(&q, heads, head_dim, &[0, 2, 1, 3]);
        let k = self.split_heads(&k, heads, head_dim, &[0, 2, 3, 1]);
        let v = self.split_heads(&v, heads, head_dim, &[0, 2, 1, 3]);

        let scores = self.op("MatMul", &[&q, &k]);
        let scale = self.scalar_f32(1.0 / (head_dim as f32).sqrt());
        let scaled = self.op("Mul", &[&scores, &scale]);
        let masked = self.op("Add", &[&scaled, bias]);
        let probs = self.node("Softmax", &[&masked], vec![attr_int("axis", -1)]);
        let context = self.op("MatMul", &[&probs, &v]);
        let context = self.node("Transpose", &[&context], vec![attr_ints("perm", &[0, 2, 1, 3])]);
        let merged_shape = self.const_i64(&[0, 0, config.hidden_size as i64], &[3]);
        let context = self.op("Reshape", &[&context, &merged_shape]);

        let attn_out = self.linear(&format!("{}.attention.output.dense", prefix), &context)?;
        let residual = self.op("Add", &[&attn_out, hidden]);
        let attended = self.layer_norm(&format!("{}.attention.output.LayerNorm", prefix), &residual, eps)?;

        let inner = self.linear(&format!("{}.intermediate.dense", prefix), &attended)?;
        let inner = self.gelu(&inner, activation);
        let out = self.linear(&format!("{}.output.dense", prefix), &inner)?;
        let residual = self.op("Add", &[&out, &attended]);
        self.layer_norm(&format!("{}.output.LayerNorm", prefix), &residual, eps)
    }

    fn head(&mut self, kind: EncoderKind, hidden: &str) -> Result<(), ExportError> {
        let index = self.scalar_i64(0);
        let first = self.node("Gather", &[hidden, &index], vec![attr_int("axis", 1)]);
        let dense = self.linear(kind.head_dense(), &first)?;
        let pooled = self.op("Tanh", &[&dense]);

        let prefix = kind.head_out();
        let weight = self.param(&format!("{}.weight", prefix))?.t()?.contiguous()?;
        let weight = self.external(&format!("{}.weight_t", prefix), &weight)?;
        let bias = self.weight(&format!("{}.bias", prefix))?;
        let product = self.op("MatMul", &[&pooled, &weight]);
        self.node_into("Add", &[&product, &bias], Vec::new(), LOGITS);
        Ok(())
    }
}

/// Exports the classifier held in `varmap` to `bundle.onnx_path()`.
///
/// Inputs are `input_ids`, `attention_mask` and, for encoders with token
/// type embeddings, `token_type_ids`, all int64 `[batch, sequence]`. The
/// single output `logits` is float `[batch, num_labels]`.
pub fn export_onnx(
    varmap: &VarMap,
    config: &EncoderConfig,
    num_labels: usize,
    bundle: &ArtifactBundle,
) -> Result<PathBuf, ExportError> {
    let kind = config.kind()?;
    let activation = config.activation()?;
    let params = varmap.data().lock().map_err(|_| ExportError::Poisoned)?;
    let mut builder = GraphBuilder::new(&params);

    let bias = builder.mask_bias();
    let mut hidden = builder.embeddings(config, kind)?;
    for i in 0..config.num_hidden_layers {
        let prefix = format!("{}.encoder.layer.{}", kind.prefix(), i);
        hidden = builder.layer(config, activation, &prefix, &hidden, &bias)?;
    }
    builder.head(kind, &hidden)?;

    let token_dims = [Dim::Symbolic("batch"), Dim::Symbolic("sequence")];
    let mut inputs = vec![
        value_info(INPUT_IDS, DataType::Int64, &token_dims),
        value_info(ATTENTION_MASK, DataType::Int64, &token_dims),
    ];
    if config.has_token_types() {
        inputs.push(value_info(TOKEN_TYPE_IDS, DataType::Int64, &token_dims));
    }
    let output = value_info(
        LOGITS,
        DataType::Float,
        &[Dim::Symbolic("batch"), Dim::Fixed(num_labels as i64)],
    );

    let GraphBuilder {
        nodes,
        initializers,
        external,
        ..
    } = builder;
    let model = ModelProto {
        ir_version: IR_VERSION,
        producer_name: env!("CARGO_PKG_NAME").to_string(),
        graph: Some(GraphProto {
            node: nodes,
            name: "intent_classifier".to_string(),
            initializer: initializers,
            input: inputs,
            output: vec![output],
        }),
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: OPSET_VERSION,
        }],
    };

    fs::create_dir_all(bundle.onnx_dir())?;
    fs::write(bundle.onnx_data_path(), &external)?;
    let path = bundle.onnx_path();
    fs::write(&path, model.encode_to_vec())?;
    info!(
        "Exported ONNX graph to {} ({} bytes of weights)",
        path.display(),
        external.len()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SequenceClassifier;
    use candle_core::Device;
    use candle_nn::VarBuilder;

    fn tiny(model_type: &str) -> EncoderConfig {
        EncoderConfig {
            model_type: model_type.to_string(),
            vocab_size: 20,
            hidden_size: 4,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            intermediate_size: 8,
            hidden_act: "gelu".to_string(),
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
            max_position_embeddings: 16,
            type_vocab_size: 0,
            layer_norm_eps: 1e-5,
            pad_token_id: 0,
        }
    }

    #[test]
    fn test_graph_layout() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ArtifactBundle::new(dir.path());
        let config = tiny("bert");
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        SequenceClassifier::new(&config, 3, vb).unwrap();

        let path = export_onnx(&varmap, &config, 3, &bundle).unwrap();
        let model = ModelProto::decode(fs::read(&path).unwrap().as_slice()).unwrap();
        assert_eq!(model.ir_version, IR_VERSION);
        assert_eq!(model.opset_import[0].version, OPSET_VERSION);

        let graph = model.graph.unwrap();
        let inputs: Vec<&str> = graph.input.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(inputs, vec![INPUT_IDS, ATTENTION_MASK]);
        assert_eq!(graph.output[0].name, LOGITS);
        assert_eq!(graph.node.last().unwrap().output, vec![LOGITS.to_string()]);

        let external: Vec<&TensorProto> = graph
            .initializer
            .iter()
            .filter(|t| t.data_location == DataLocation::External as i32)
            .collect();
        assert!(external.iter().any(|t| t.name == "classifier.weight_t" && t.dims == vec![4, 3]));
        let data_len = fs::metadata(bundle.onnx_data_path()).unwrap().len() as usize;
        for tensor in external {
            let offset: usize = tensor.external_data[1].value.parse().unwrap();
            let length: usize = tensor.external_data[2].value.parse().unwrap();
            assert_eq!(offset % EXTERNAL_ALIGNMENT, 0);
            assert!(offset + length <= data_len);
        }
    }

    #[test]
    fn test_missing_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ArtifactBundle::new(dir.path());
        let err = export_onnx(&VarMap::new(), &tiny("xlm-roberta"), 2, &bundle).unwrap_err();
        assert!(matches!(err, ExportError::MissingParameter(_)));
    }
}
