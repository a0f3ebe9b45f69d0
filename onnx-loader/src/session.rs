//! Model invocation: named tensors in, named tensors out.

use crate::convert;
use crate::error::{OnnxError, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::ValueType;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use xmodal_common::{OptimizationLevel, SessionSettings};
use xmodal_values::{TensorDataType, TensorMap};

/// Name, element type and shape of a graph input or output.
///
/// Symbolic dimensions (batch, sequence) are `-1`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    pub name: String,
    pub dtype: Option<TensorDataType>,
    pub shape: Vec<i64>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), dtype: None, shape: Vec::new() }
    }

    pub fn with_dtype(mut self, dtype: TensorDataType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_shape(mut self, shape: Vec<i64>) -> Self {
        self.shape = shape;
        self
    }

    /// Size of a dimension when it is fixed in the graph.
    pub fn fixed_dim(&self, axis: usize) -> Option<usize> {
        self.shape.get(axis).filter(|&&d| d > 0).map(|&d| d as usize)
    }
}

/// A loaded graph that maps named input tensors to named output tensors.
///
/// Implementations hold no per-call state; anything that must persist
/// between calls (a decode cache) is passed in and returned explicitly.
pub trait InferenceSession: Send + Sync {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap>;

    fn inputs(&self) -> &[TensorSpec];

    fn outputs(&self) -> &[TensorSpec];

    fn input_names(&self) -> Vec<&str> {
        self.inputs().iter().map(|s| s.name.as_str()).collect()
    }

    fn output_names(&self) -> Vec<&str> {
        self.outputs().iter().map(|s| s.name.as_str()).collect()
    }

    fn has_input(&self, name: &str) -> bool {
        self.inputs().iter().any(|s| s.name == name)
    }

    fn has_output(&self, name: &str) -> bool {
        self.outputs().iter().any(|s| s.name == name)
    }

    fn input_spec(&self, name: &str) -> Option<&TensorSpec> {
        self.inputs().iter().find(|s| s.name == name)
    }
}

/// ONNX Runtime session with the workspace's session defaults.
///
/// `ort` needs `&mut Session` to run, so calls on one session are serialized
/// through a mutex; clones share the same underlying session.
///
/// # Examples
/// ```ignore
/// let session = OnnxSession::load("onnx/model.onnx")?;
/// let outputs = session.run(encoding.into_tensor_map())?;
/// let logits = outputs.require("logits")?;
/// ```
#[derive(Clone)]
pub struct OnnxSession {
    model_path: PathBuf,
    session: Arc<Mutex<Session>>,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
}

impl OnnxSession {
    /// Load ONNX model with default session settings
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::load_with_settings(model_path, &SessionSettings::default())
    }

    pub fn load_with_settings<P: AsRef<Path>>(model_path: P, settings: &SessionSettings) -> Result<Self> {
        let model_path = model_path.as_ref();
        log::info!("Loading ONNX model from: {:?}", model_path);

        if !model_path.exists() {
            return Err(OnnxError::ModelLoadFailed(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        let level = match settings.optimization_level {
            OptimizationLevel::Disable => GraphOptimizationLevel::Disable,
            OptimizationLevel::Level1 => GraphOptimizationLevel::Level1,
            OptimizationLevel::Level2 => GraphOptimizationLevel::Level2,
            OptimizationLevel::Level3 => GraphOptimizationLevel::Level3,
        };

        let session = Session::builder()
            .map_err(|e| OnnxError::SessionCreationFailed(e.to_string()))?
            .with_optimization_level(level)
            .map_err(|e| OnnxError::SessionCreationFailed(
                format!("Failed to set optimization level: {}", e)
            ))?
            .with_intra_threads(settings.intra_threads)
            .map_err(|e| OnnxError::SessionCreationFailed(
                format!("Failed to set intra threads: {}", e)
            ))?
            .with_inter_threads(settings.inter_threads)
            .map_err(|e| OnnxError::SessionCreationFailed(
                format!("Failed to set inter threads: {}", e)
            ))?
            .with_parallel_execution(settings.parallel_execution)
            .map_err(|e| OnnxError::SessionCreationFailed(
                format!("Failed to set parallel execution: {}", e)
            ))?
            .commit_from_file(model_path)
            .map_err(|e| OnnxError::ModelLoadFailed(e.to_string()))?;

        let inputs: Vec<TensorSpec> = session
            .inputs
            .iter()
            .map(|i| spec_from(&i.name, &i.input_type))
            .collect();
        let outputs: Vec<TensorSpec> = session
            .outputs
            .iter()
            .map(|o| spec_from(&o.name, &o.output_type))
            .collect();

        log::info!(
            "ONNX model loaded: {} inputs, {} outputs",
            inputs.len(),
            outputs.len()
        );
        log::debug!("  - Optimization: {:?}", settings.optimization_level);
        log::debug!("  - Intra-op threads: {}", settings.intra_threads);
        log::debug!("  - Inter-op threads: {}", settings.inter_threads);
        log::debug!("  - Inputs: {:?}", inputs.iter().map(|s| &s.name).collect::<Vec<_>>());

        Ok(Self {
            model_path: model_path.to_path_buf(),
            session: Arc::new(Mutex::new(session)),
            inputs,
            outputs,
        })
    }

    /// Get model path
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Direct access to the underlying `ort::Session`.
    pub fn session(&self) -> Arc<Mutex<Session>> {
        Arc::clone(&self.session)
    }
}

fn spec_from(name: &str, value_type: &ValueType) -> TensorSpec {
    match value_type {
        ValueType::Tensor { ty, shape, .. } => TensorSpec {
            name: name.to_string(),
            dtype: convert::dtype_from_ort(*ty),
            shape: shape.iter().copied().collect(),
        },
        _ => TensorSpec::new(name),
    }
}

impl InferenceSession for OnnxSession {
    /// Feeds exactly the inputs the graph declares; extra entries are ignored.
    fn run(&self, mut inputs: TensorMap) -> Result<TensorMap> {
        let mut feed = Vec::with_capacity(self.inputs.len());
        for spec in &self.inputs {
            let tensor = inputs
                .remove(&spec.name)
                .ok_or_else(|| OnnxError::MissingInput { name: spec.name.clone() })?;
            let tensor = convert::coerce(tensor, spec.dtype)?;
            feed.push((spec.name.clone(), convert::to_ort(&tensor)?));
        }
        if !inputs.is_empty() {
            log::trace!("Ignoring undeclared inputs: {:?}", inputs.names().collect::<Vec<_>>());
        }

        let mut session = self
            .session
            .lock()
            .map_err(|e| OnnxError::InferenceFailed(format!("Session lock failed: {}", e)))?;
        let outputs = session
            .run(feed)
            .map_err(|e| OnnxError::InferenceFailed(e.to_string()))?;

        let mut result = TensorMap::new();
        for spec in &self.outputs {
            if let Some(value) = outputs.get(spec.name.as_str()) {
                result.insert(spec.name.clone(), convert::from_ort(&spec.name, value)?);
            }
        }
        Ok(result)
    }

    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorSpec] {
        &self.outputs
    }
}
