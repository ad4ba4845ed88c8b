use std::sync::OnceLock;

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;

use crate::inference::InferenceError;

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Graph optimisation level applied when a session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    Disable,
    Basic,
    Extended,
    All,
}

impl From<OptimizationLevel> for GraphOptimizationLevel {
    fn from(level: OptimizationLevel) -> Self {
        match level {
            OptimizationLevel::Disable => GraphOptimizationLevel::Disable,
            OptimizationLevel::Basic => GraphOptimizationLevel::Level1,
            OptimizationLevel::Extended => GraphOptimizationLevel::Level2,
            OptimizationLevel::All => GraphOptimizationLevel::Level3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// 0 lets ONNX Runtime decide
    pub inter_threads: usize,
    /// 0 lets ONNX Runtime decide
    pub intra_threads: usize,
    pub optimization_level: OptimizationLevel,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inter_threads: 0,
            intra_threads: 0,
            optimization_level: OptimizationLevel::All,
        }
    }
}

/// Commits the process-wide ONNX Runtime environment on first use. Later
/// calls return the outcome of that first attempt.
pub fn ensure_initialized() -> Result<(), InferenceError> {
    INIT.get_or_init(|| {
        ort::init()
            .with_name("vi_intent")
            .commit()
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .clone()
    .map_err(|e| InferenceError::ModelError(format!("Failed to initialize ONNX Runtime: {}", e)))
}

pub fn create_session_builder(config: &RuntimeConfig) -> Result<SessionBuilder, InferenceError> {
    ensure_initialized()?;
    let mut builder = Session::builder()?;

    if config.inter_threads > 0 {
        builder = builder.with_inter_threads(config.inter_threads)?;
    }
    if config.intra_threads > 0 {
        builder = builder.with_intra_threads(config.intra_threads)?;
    }
    builder = builder.with_optimization_level(config.optimization_level.into())?;

    Ok(builder)
}
