//! Label-map persistence
//!
//! Writes the per-frame argmax label map twice: as a grayscale PNG of
//! regular label ids (the format dataset tooling consumes) and as a
//! palette-colored PNG for visual inspection.

use anyhow::{Context, Result};
use image::{GrayImage, Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::types::{LabelMap, CLASS_PALETTE};

/// Writes label maps for processed frames.
pub struct LabelWriter {
    label_dir: PathBuf,
    color_dir: PathBuf,
}

impl LabelWriter {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(label_dir: P, color_dir: Q) -> Self {
        Self {
            label_dir: label_dir.as_ref().to_path_buf(),
            color_dir: color_dir.as_ref().to_path_buf(),
        }
    }

    /// Create the output directories if they do not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.label_dir)
            .with_context(|| format!("creating {}", self.label_dir.display()))?;
        fs::create_dir_all(&self.color_dir)
            .with_context(|| format!("creating {}", self.color_dir.display()))?;
        Ok(())
    }

    pub fn label_path(&self, frame_name: &str) -> PathBuf {
        self.label_dir.join(format!("{frame_name}.png"))
    }

    pub fn color_path(&self, frame_name: &str) -> PathBuf {
        self.color_dir.join(format!("{frame_name}_color.png"))
    }

    /// Whether both outputs for a frame already exist.
    pub fn exists(&self, frame_name: &str) -> bool {
        self.label_path(frame_name).exists() && self.color_path(frame_name).exists()
    }

    /// Write the label-id and color PNGs for one frame.
    pub fn write(&self, frame_name: &str, labels: &LabelMap) -> Result<()> {
        let (h, w) = (labels.height(), labels.width());

        let ids = labels.to_label_ids();
        let raw: Vec<u8> = ids.iter().copied().collect();
        let gray = GrayImage::from_raw(w as u32, h as u32, raw)
            .context("label map does not fill its image buffer")?;
        let label_path = self.label_path(frame_name);
        gray.save(&label_path)
            .with_context(|| format!("writing {}", label_path.display()))?;

        let mut color = RgbImage::new(w as u32, h as u32);
        for (y, row) in labels.data().outer_iter().enumerate() {
            for (x, &id) in row.iter().enumerate() {
                let rgb = CLASS_PALETTE
                    .get(id as usize)
                    .copied()
                    .unwrap_or([0, 0, 0]);
                color.put_pixel(x as u32, y as u32, Rgb(rgb));
            }
        }
        let color_path = self.color_path(frame_name);
        color
            .save(&color_path)
            .with_context(|| format!("writing {}", color_path.display()))?;

        info!(
            frame = %frame_name,
            label = %label_path.display(),
            "wrote label map"
        );
        Ok(())
    }
}
