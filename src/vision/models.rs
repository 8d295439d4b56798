//! Model loading for ONNX Runtime
//!
//! Wraps an ONNX Runtime session with the single-input, single-output
//! inference both plate models need.

use anyhow::{bail, Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use tracing::info;

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path) -> Result<Self> {
        if !model_path.is_file() {
            bail!("Model file not found: {:?}", model_path);
        }

        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        if input_names.is_empty() || output_names.is_empty() {
            bail!("Model {:?} has no inputs or no outputs", model_path);
        }

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    /// Get input tensor info
    pub fn input_info(&self) -> Vec<TensorInfo> {
        self.session
            .inputs
            .iter()
            .map(|input| TensorInfo {
                name: input.name.clone(),
                shape: extract_shape(&input.input_type),
            })
            .collect()
    }

    /// Run the model on one NCHW f32 tensor and return the first output
    /// as `(shape, data)`
    pub fn run(&mut self, shape: [usize; 4], data: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let input_name = self.input_names[0].clone();
        let output_name = self.output_names[0].clone();

        let input = Tensor::from_array((shape, data.into_boxed_slice()))
            .context("Failed to create input tensor")?
            .into_dyn();

        let outputs = self
            .session
            .run(ort::inputs![input_name.as_str() => input])
            .context("Inference failed")?;

        let (out_shape, out_data) = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .context("Failed to extract output tensor")?;

        let dims = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, out_data.to_vec()))
    }
}

/// Tensor shape information
#[derive(Debug, Clone)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<i64>,
}

impl TensorInfo {
    /// Size of dimension `axis` when the model fixes it
    pub fn fixed_dim(&self, axis: usize) -> Option<u32> {
        self.shape
            .get(axis)
            .copied()
            .filter(|&d| d > 0)
            .and_then(|d| u32::try_from(d).ok())
    }
}

/// Extract shape from ONNX value type
fn extract_shape(value_type: &ort::value::ValueType) -> Vec<i64> {
    if let Some(shape) = value_type.tensor_shape() {
        shape.iter().copied().collect()
    } else {
        vec![]
    }
}
