//! Model loading and per-crop scoring

pub mod loader;
pub mod onnx;
pub mod scorer;

pub use loader::{LoadedModel, ModelLoader};
pub use onnx::OnnxScorer;
pub use scorer::{score_forward, score_with_flip, CropSample, CropScorer};
