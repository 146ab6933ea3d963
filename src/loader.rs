//! Frame and optical-flow loading
//!
//! Turns dataset files into the padded, mean-subtracted tensors the
//! tiled inference stage consumes. Frames follow the Cityscapes
//! sequence layout (`<root>/<split>/<city>/<seq>_<frame:06>_leftImg8bit.png`)
//! with precomputed `.flo` flow files side by side under a flow root.

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use image::imageops::{self, FilterType};
use image::{Rgb, Rgb32FImage};
use ndarray::Array3;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use tracing::debug;

use crate::config::{DatasetConfig, InferenceConfig};
use crate::types::{FlowField, FrameTensor, SequenceSample};

/// Magic number at the head of every `.flo` file.
const FLO_MAGIC: f32 = 202021.25;

/// One frame to segment, identified by its sequence and frame number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTarget {
    /// Sequence stem, e.g. `frankfurt_000000`.
    pub sequence: String,
    /// Frame number within the sequence.
    pub frame_index: u32,
}

impl FrameTarget {
    /// Parse a manifest entry of the form `<seq>_<frame>`, optionally
    /// carrying the `_leftImg8bit.png` suffix.
    pub fn parse(entry: &str) -> Result<Self> {
        let stem = entry
            .trim()
            .trim_end_matches(".png")
            .trim_end_matches("_leftImg8bit");
        let (sequence, frame) = stem
            .rsplit_once('_')
            .with_context(|| format!("malformed manifest entry '{entry}'"))?;
        let frame_index: u32 = frame
            .parse()
            .with_context(|| format!("bad frame number in manifest entry '{entry}'"))?;
        Ok(Self {
            sequence: sequence.to_string(),
            frame_index,
        })
    }

    /// Canonical frame stem, e.g. `frankfurt_000000_000294`.
    pub fn frame_name(&self) -> String {
        format!("{}_{:06}", self.sequence, self.frame_index)
    }

    /// City directory, the first `_`-separated segment of the sequence.
    pub fn city(&self) -> &str {
        self.sequence.split('_').next().unwrap_or(&self.sequence)
    }

    /// The same target shifted back `offset` frames.
    pub fn previous(&self, offset: u32) -> Self {
        Self {
            sequence: self.sequence.clone(),
            frame_index: self.frame_index.saturating_sub(offset),
        }
    }
}

/// Parse a manifest file: one frame stem per line, `#` comments and
/// blank lines skipped.
pub fn parse_manifest(contents: &str) -> Result<Vec<FrameTarget>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(FrameTarget::parse)
        .collect()
}

/// Loads frames and flow fields for one worker.
pub struct FrameLoader {
    image_root: PathBuf,
    flow_root: PathBuf,
    split: String,
    mean_pixel: [f32; 3],
    crop_size: usize,
    prev_frames: usize,
}

impl FrameLoader {
    pub fn new(dataset: &DatasetConfig, inference: &InferenceConfig) -> Self {
        Self {
            image_root: PathBuf::from(&dataset.image_root),
            flow_root: PathBuf::from(&dataset.flow_root),
            split: dataset.split.clone(),
            mean_pixel: inference.mean_pixel,
            crop_size: inference.crop_size,
            prev_frames: inference.prev_frames,
        }
    }

    /// Path of a frame image under the image root.
    pub fn image_path(&self, target: &FrameTarget) -> PathBuf {
        self.image_root
            .join(&self.split)
            .join(target.city())
            .join(format!("{}_leftImg8bit.png", target.frame_name()))
    }

    /// Path of the flow file that ends at `target` (flow from the
    /// previous frame into this one).
    pub fn flow_path(&self, target: &FrameTarget) -> PathBuf {
        self.flow_root
            .join(&self.split)
            .join(target.city())
            .join(format!("{}_leftImg8bit.flo", target.frame_name()))
    }

    /// Native (unscaled) dimensions of a target's frame image.
    pub fn native_dimensions(&self, target: &FrameTarget) -> Result<(u32, u32)> {
        let path = self.image_path(target);
        image::image_dimensions(&path)
            .with_context(|| format!("reading dimensions of {}", path.display()))
    }

    /// Load one frame: mean-subtract, reorder RGB to BGR, resize to
    /// `round(scale * dim) + 1`, lay out as `[3, h, w]`, and zero-pad
    /// bottom/right up to the crop size.
    pub fn load_frame(&self, target: &FrameTarget, scale: f64) -> Result<FrameTensor> {
        let path = self.image_path(target);
        let img = image::open(&path)
            .with_context(|| format!("opening frame {}", path.display()))?
            .to_rgb8();
        let (w, h) = img.dimensions();

        let mut buf = Rgb32FImage::new(w, h);
        for (x, y, p) in img.enumerate_pixels() {
            let r = p[0] as f32 - self.mean_pixel[0];
            let g = p[1] as f32 - self.mean_pixel[1];
            let b = p[2] as f32 - self.mean_pixel[2];
            buf.put_pixel(x, y, Rgb([b, g, r]));
        }

        let (tw, th) = scaled_dims(w, h, scale);
        let resized = if (tw, th) == (w, h) {
            buf
        } else {
            imageops::resize(&buf, tw, th, FilterType::Triangle)
        };

        let (valid_h, valid_w) = (th as usize, tw as usize);
        let padded_h = valid_h.max(self.crop_size);
        let padded_w = valid_w.max(self.crop_size);
        let mut data = Array3::<f32>::zeros((3, padded_h, padded_w));
        for (x, y, p) in resized.enumerate_pixels() {
            for c in 0..3 {
                data[[c, y as usize, x as usize]] = p[c];
            }
        }

        debug!(
            frame = %target.frame_name(),
            scale,
            valid_h,
            valid_w,
            "loaded frame"
        );
        Ok(FrameTensor::new(data, valid_h, valid_w))
    }

    /// Load the flow field ending at `target`, resized to the same
    /// scaled dimensions as the frames, vectors multiplied by the scale
    /// factor, zero-padded to the crop size.
    pub fn load_flow(&self, target: &FrameTarget, scale: f64) -> Result<FlowField> {
        let path = self.flow_path(target);
        let file = File::open(&path)
            .with_context(|| format!("opening flow {}", path.display()))?;
        let raw = read_flo(BufReader::new(file))
            .with_context(|| format!("parsing flow {}", path.display()))?;
        let (_, h, w) = raw.dim();

        let (tw, th) = scaled_dims(w as u32, h as u32, scale);
        let (valid_h, valid_w) = (th as usize, tw as usize);
        let padded_h = valid_h.max(self.crop_size);
        let padded_w = valid_w.max(self.crop_size);
        let mut data = Array3::<f32>::zeros((2, padded_h, padded_w));

        let s = scale as f32;
        for c in 0..2 {
            let plane: Vec<f32> =
                raw.index_axis(ndarray::Axis(0), c).iter().copied().collect();
            let buf = image::ImageBuffer::<image::Luma<f32>, Vec<f32>>::from_raw(
                w as u32, h as u32, plane,
            )
            .context("flow plane size mismatch")?;
            let resized = if (tw, th) == (w as u32, h as u32) {
                buf
            } else {
                imageops::resize(&buf, tw, th, FilterType::Triangle)
            };
            for (x, y, p) in resized.enumerate_pixels() {
                data[[c, y as usize, x as usize]] = p[0] * s;
            }
        }

        Ok(FlowField::new(data))
    }

    /// Assemble the sequence for a target frame at one scale: the
    /// `prev_frames` preceding frames, the target itself, and the flow
    /// fields connecting each consecutive pair, oldest first.
    pub fn load_sequence(&self, target: &FrameTarget, scale: f64) -> Result<SequenceSample> {
        let count = self.prev_frames as u32;
        let mut frames = Vec::with_capacity(self.prev_frames + 1);
        let mut flows = Vec::with_capacity(self.prev_frames);

        for offset in (0..=count).rev() {
            let t = target.previous(offset);
            frames.push(self.load_frame(&t, scale)?);
            if offset < count {
                flows.push(self.load_flow(&t, scale)?);
            }
        }

        Ok(SequenceSample { frames, flows })
    }
}

/// Scaled dimensions, `round(scale * dim) + 1` per axis.
pub fn scaled_dims(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let w = (scale * width as f64).round() as u32 + 1;
    let h = (scale * height as f64).round() as u32 + 1;
    (w, h)
}

/// Parse a `.flo` stream into a `[2, height, width]` array, channel 0
/// holding the x-component. Rejects streams without the flow magic.
pub fn read_flo<R: Read>(mut reader: R) -> Result<Array3<f32>> {
    let magic = reader.read_f32::<LittleEndian>().context("reading flow magic")?;
    if magic != FLO_MAGIC {
        bail!("bad flow magic {magic}, expected {FLO_MAGIC}");
    }
    let width = reader.read_i32::<LittleEndian>().context("reading flow width")?;
    let height = reader.read_i32::<LittleEndian>().context("reading flow height")?;
    if width <= 0 || height <= 0 {
        bail!("bad flow dimensions {width}x{height}");
    }
    let (w, h) = (width as usize, height as usize);

    let mut data = Array3::<f32>::zeros((2, h, w));
    for y in 0..h {
        for x in 0..w {
            data[[0, y, x]] = reader.read_f32::<LittleEndian>().context("reading flow data")?;
            data[[1, y, x]] = reader.read_f32::<LittleEndian>().context("reading flow data")?;
        }
    }
    Ok(data)
}
