//! ONNX Runtime backed crop scorer
//!
//! Drives the temporal segmentation network over a crop sample. The
//! network scores one frame pair per step and emits a feature map that
//! is fed back into the next step, so a sample with N previous frames
//! takes N + 1 runs; the score map of the final step (the target frame)
//! is the crop's raw score.

use anyhow::{bail, Context, Result};
use ndarray::Array3;
use ort::value::Tensor;

use crate::config::AppConfig;
use crate::models::loader::{LoadedModel, ModelLoader};
use crate::models::scorer::{CropSample, CropScorer};
use crate::tiling::error::TilingError;

/// Scorer running the segmentation network through ONNX Runtime.
///
/// Each worker owns its own `OnnxScorer`; the session is never shared.
pub struct OnnxScorer {
    model: LoadedModel,
    num_classes: usize,
    feature_shape: [usize; 3],
}

impl OnnxScorer {
    /// Load the network configured in `config`.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let loader = ModelLoader::with_threads(config.model.onnx_threads)?;
        let model = loader.load_model(&config.model.model_path)?;

        Ok(Self {
            model,
            num_classes: config.inference.num_classes,
            feature_shape: config.model.feature_shape,
        })
    }

    fn run_steps(&mut self, sample: &CropSample) -> Result<Array3<f32>> {
        if sample.frames.is_empty() {
            bail!("crop sample holds no frames");
        }
        if sample.flows.len() + 1 != sample.frames.len() {
            bail!(
                "crop sample has {} frames but {} flows",
                sample.frames.len(),
                sample.flows.len()
            );
        }

        let size = sample.size;
        let zero_frame = Array3::<f32>::zeros((3, size, size));
        let zero_flow = Array3::<f32>::zeros((2, size, size));
        let (fc, fh, fw) = (
            self.feature_shape[0],
            self.feature_shape[1],
            self.feature_shape[2],
        );

        let mut carried = Array3::<f32>::zeros((fc, fh, fw));
        let mut scores = None;

        for (j, frame) in sample.frames.iter().enumerate() {
            let previous = if j == 0 {
                &zero_frame
            } else {
                &sample.frames[j - 1]
            };
            let flow = if j == 0 { &zero_flow } else { &sample.flows[j - 1] };

            let outputs = self
                .model
                .session
                .run(ort::inputs![
                    &self.model.inputs.current => tensor_from(frame)?,
                    &self.model.inputs.previous => tensor_from(previous)?,
                    &self.model.inputs.flow => tensor_from(flow)?,
                    &self.model.inputs.features => tensor_from(&carried)?,
                ])
                .context("running segmentation network")?;

            carried = extract_array3(&outputs, &self.model.outputs.features)
                .context("extracting carried features")?;
            scores = Some(
                extract_array3(&outputs, &self.model.outputs.scores)
                    .context("extracting score map")?,
            );
        }

        // frames is non-empty, so the loop ran at least once
        scores.context("network produced no score map")
    }
}

impl CropScorer for OnnxScorer {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn score(&mut self, sample: &CropSample) -> Result<Array3<f32>, TilingError> {
        self.run_steps(sample).map_err(TilingError::Scorer)
    }
}

/// Build a `[1, C, H, W]` input tensor from a `[C, H, W]` array.
fn tensor_from(array: &Array3<f32>) -> Result<Tensor<f32>> {
    let (c, h, w) = array.dim();
    let shape = vec![1_i64, c as i64, h as i64, w as i64];
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_array((shape, data)).context("Failed to create input tensor")
}

/// Extract a named output as a `[C, H, W]` array, accepting a leading
/// batch dimension of 1.
fn extract_array3(
    outputs: &ort::session::SessionOutputs,
    name: &str,
) -> Result<Array3<f32>> {
    let output = outputs
        .get(name)
        .with_context(|| format!("output '{name}' missing from network results"))?;
    let (shape, data) = output
        .try_extract_tensor::<f32>()
        .with_context(|| format!("output '{name}' is not an f32 tensor"))?;

    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    let (c, h, w) = match dims.as_slice() {
        [1, c, h, w] => (*c, *h, *w),
        [c, h, w] => (*c, *h, *w),
        other => bail!("output '{name}' has unexpected shape {other:?}"),
    };

    Array3::from_shape_vec((c, h, w), data.to_vec())
        .with_context(|| format!("output '{name}' data does not fill its shape"))
}
