use std::path::{Path, PathBuf};

/// File layout of a trained artifact bundle.
///
/// ```text
/// <root>/
///   config.json            encoder config with id2label / label2id
///   model.safetensors      fine-tuned parameters
///   labels.json            ordered label list, index = class id
///   hf_model/tokenizer.json
///   onnx/model.onnx        inference graph
///   onnx/model.onnx.data   external weights of the graph
///   hf_ckpt/               best-epoch checkpoint during training
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    root: PathBuf,
}

pub const ONNX_DATA_FILE: &str = "model.onnx.data";

impl ArtifactBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn weights_path(&self) -> PathBuf {
        self.root.join("model.safetensors")
    }

    pub fn labels_path(&self) -> PathBuf {
        self.root.join("labels.json")
    }

    pub fn tokenizer_dir(&self) -> PathBuf {
        self.root.join("hf_model")
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.tokenizer_dir().join("tokenizer.json")
    }

    pub fn onnx_dir(&self) -> PathBuf {
        self.root.join("onnx")
    }

    pub fn onnx_path(&self) -> PathBuf {
        self.onnx_dir().join("model.onnx")
    }

    pub fn onnx_data_path(&self) -> PathBuf {
        self.onnx_dir().join(ONNX_DATA_FILE)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.root.join("hf_ckpt")
    }

    pub fn best_checkpoint_path(&self) -> PathBuf {
        self.checkpoint_dir().join("best.safetensors")
    }

    /// True once the files inference needs are all present.
    pub fn is_complete(&self) -> bool {
        self.labels_path().exists() && self.tokenizer_path().exists() && self.onnx_path().exists()
    }
}
