//! ONNX model loader

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::info;

/// Input names of the temporal segmentation network
#[derive(Debug, Clone)]
pub struct NetworkInputs {
    /// Current frame crop
    pub current: String,
    /// Previous frame crop
    pub previous: String,
    /// Flow from the previous frame into the current one
    pub flow: String,
    /// Feature map carried over from the previous step
    pub features: String,
}

/// Output names of the temporal segmentation network
#[derive(Debug, Clone)]
pub struct NetworkOutputs {
    /// Upsampled class score map
    pub scores: String,
    /// Feature map to carry into the next step
    pub features: String,
}

/// Loaded ONNX model with probed input/output names
pub struct LoadedModel {
    /// ONNX Runtime session
    pub session: Session,
    pub inputs: NetworkInputs,
    pub outputs: NetworkOutputs,
}

/// Loader for the segmentation network
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Result<Self> {
        Self::with_threads(1)
    }

    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        ort::init().commit()?;
        info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Load the segmentation network from file
    pub fn load_model<P: AsRef<Path>>(&self, path: P) -> Result<LoadedModel> {
        let path = path.as_ref();

        info!(path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = |needle: &str, fallback: &str| {
            session
                .inputs
                .iter()
                .find(|i| i.name.contains(needle))
                .map(|i| i.name.clone())
                .unwrap_or_else(|| fallback.to_string())
        };
        let inputs = NetworkInputs {
            current: input_name("data_0", "data_0"),
            previous: input_name("data_1", "data_1"),
            flow: input_name("flo", "flo_1"),
            features: input_name("conv", "conv5_4_1"),
        };

        let output_name = |needle: &str, fallback: &str| {
            session
                .outputs
                .iter()
                .find(|o| o.name.contains(needle))
                .map(|o| o.name.clone())
                .unwrap_or_else(|| fallback.to_string())
        };
        let outputs = NetworkOutputs {
            scores: output_name("upsampled", "upsampled"),
            features: output_name("conv", "conv5_4"),
        };

        info!(
            current = %inputs.current,
            previous = %inputs.previous,
            flow = %inputs.flow,
            scores = %outputs.scores,
            "Model loaded successfully"
        );

        Ok(LoadedModel {
            session,
            inputs,
            outputs,
        })
    }
}
