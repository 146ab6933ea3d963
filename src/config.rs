//! Configuration management for the segmentation pipeline

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub inference: InferenceConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Dataset layout configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// Root directory of the frame images
    pub image_root: String,
    /// Root directory of the precomputed optical flow files
    pub flow_root: String,
    /// Dataset split to process (train, val, test)
    #[serde(default = "default_split")]
    pub split: String,
    /// Manifest file listing the target frames, one per line
    pub manifest: String,
    /// Optional root of ground-truth label maps for scoring
    #[serde(default)]
    pub ground_truth_root: Option<String>,
}

/// Segmentation model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Path to the ONNX model file
    pub model_path: String,
    /// Number of threads for ONNX inference per worker (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Shape of the temporal feature map carried between steps
    #[serde(default = "default_feature_shape")]
    pub feature_shape: [usize; 3],
}

/// Tiled inference configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Scale factors applied to the canonical resolution
    #[serde(default = "default_scales")]
    pub scales: Vec<f64>,
    /// Side length of the square network input crop
    #[serde(default = "default_crop_size")]
    pub crop_size: usize,
    /// Stride between crop windows
    #[serde(default = "default_stride")]
    pub stride: usize,
    /// Number of output classes
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    /// Mean pixel subtracted before inference (RGB order)
    #[serde(default = "default_mean_pixel")]
    pub mean_pixel: [f32; 3],
    /// Number of previous frames fed alongside the target frame
    #[serde(default = "default_prev_frames")]
    pub prev_frames: usize,
    /// Whether to average in a horizontally flipped scoring pass
    #[serde(default = "default_flip")]
    pub flip: bool,
}

fn default_split() -> String {
    "val".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

fn default_feature_shape() -> [usize; 3] {
    [512, 90, 90]
}

fn default_scales() -> Vec<f64> {
    vec![0.5, 0.75, 1.0, 1.25, 1.5, 1.75]
}

fn default_crop_size() -> usize {
    713
}

fn default_stride() -> usize {
    476
}

fn default_num_classes() -> usize {
    19
}

fn default_mean_pixel() -> [f32; 3] {
    [123.68, 116.779, 103.939]
}

fn default_prev_frames() -> usize {
    2
}

fn default_flip() -> bool {
    true
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of worker tasks, each owning a private inference session
    pub workers: usize,
    /// Skip frames whose outputs already exist
    #[serde(default = "default_skip_existing")]
    pub skip_existing: bool,
}

fn default_skip_existing() -> bool {
    true
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory for indexed label-id PNGs
    pub label_dir: String,
    /// Directory for palette-colored PNGs
    pub color_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig {
                image_root: "data/leftImg8bit_sequence".to_string(),
                flow_root: "data/flow_sequence".to_string(),
                split: default_split(),
                manifest: "data/val_frames.txt".to_string(),
                ground_truth_root: None,
            },
            model: ModelConfig {
                model_path: "models/netwarp_pspnet.onnx".to_string(),
                onnx_threads: default_onnx_threads(),
                feature_shape: default_feature_shape(),
            },
            inference: InferenceConfig {
                scales: default_scales(),
                crop_size: default_crop_size(),
                stride: default_stride(),
                num_classes: default_num_classes(),
                mean_pixel: default_mean_pixel(),
                prev_frames: default_prev_frames(),
                flip: default_flip(),
            },
            pipeline: PipelineConfig {
                workers: 4,
                skip_existing: default_skip_existing(),
            },
            output: OutputConfig {
                label_dir: "results/labels".to_string(),
                color_dir: "results/color".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.inference.crop_size, 713);
        assert_eq!(config.inference.stride, 476);
        assert_eq!(config.inference.num_classes, 19);
        assert_eq!(
            config.inference.scales,
            vec![0.5, 0.75, 1.0, 1.25, 1.5, 1.75]
        );
        assert_eq!(config.inference.prev_frames, 2);
        assert!(config.inference.flip);
        assert_eq!(config.pipeline.workers, 4);
    }

    #[test]
    fn test_mean_pixel_defaults() {
        let mean = default_mean_pixel();
        assert_eq!(mean, [123.68, 116.779, 103.939]);
    }
}
