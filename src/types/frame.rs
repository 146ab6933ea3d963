//! Frame and flow tensors flowing through the pipeline

use ndarray::Array3;

/// A preprocessed video frame in `[channels, height, width]` layout.
///
/// The tensor is padded on the bottom/right to at least the crop size;
/// `valid_h` / `valid_w` record the pre-padding extent so downstream
/// stages can crop the padding back off.
#[derive(Debug, Clone)]
pub struct FrameTensor {
    data: Array3<f32>,
    valid_h: usize,
    valid_w: usize,
}

impl FrameTensor {
    pub fn new(data: Array3<f32>, valid_h: usize, valid_w: usize) -> Self {
        debug_assert!(valid_h <= data.shape()[1]);
        debug_assert!(valid_w <= data.shape()[2]);
        Self {
            data,
            valid_h,
            valid_w,
        }
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Padded height of the tensor.
    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    /// Padded width of the tensor.
    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }

    /// Pre-padding height.
    pub fn valid_h(&self) -> usize {
        self.valid_h
    }

    /// Pre-padding width.
    pub fn valid_w(&self) -> usize {
        self.valid_w
    }
}

/// Dense optical flow between two consecutive frames, `[2, height, width]`
/// with channel 0 the x-component and channel 1 the y-component.
#[derive(Debug, Clone)]
pub struct FlowField {
    data: Array3<f32>,
}

impl FlowField {
    pub fn new(data: Array3<f32>) -> Self {
        debug_assert_eq!(data.shape()[0], 2);
        Self { data }
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }
}

/// A target frame together with its temporal context, all resized to
/// the same scale: frames ordered oldest to newest (the target last),
/// and `flows[j]` connecting `frames[j]` to `frames[j + 1]`.
#[derive(Debug, Clone)]
pub struct SequenceSample {
    pub frames: Vec<FrameTensor>,
    pub flows: Vec<FlowField>,
}

impl SequenceSample {
    /// The frame being segmented (the newest in the sequence).
    pub fn target(&self) -> &FrameTensor {
        &self.frames[self.frames.len() - 1]
    }
}
