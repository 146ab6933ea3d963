//! Semantic Video Segmentation Pipeline Library
//!
//! Tiled multi-scale inference over video frame sequences: frames are
//! decomposed into overlapping fixed-size crops, scored by a temporal
//! segmentation network, and merged back into full-frame label maps.

pub mod config;
pub mod eval;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod output;
pub mod tiling;
pub mod types;

pub use config::AppConfig;
pub use loader::{parse_manifest, FrameLoader, FrameTarget};
pub use models::{CropScorer, OnnxScorer};
pub use output::LabelWriter;
pub use tiling::{MultiScaleCombiner, TilingError};
pub use types::{LabelMap, ProbabilityMap};
