//! Crop-grid geometry for sliding-window inference
//!
//! A frame is decomposed into fixed-size square crops laid out on a
//! stride-spaced grid. Windows near the bottom/right edges are clamped
//! inward so every window lies fully inside the frame.

use crate::tiling::error::TilingError;

/// One square window into a frame, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    /// Top row of the window.
    pub y: usize,
    /// Left column of the window.
    pub x: usize,
    /// Side length of the square window.
    pub size: usize,
}

/// Row-major collection of crop windows covering a frame.
#[derive(Debug, Clone)]
pub struct CropGrid {
    windows: Vec<CropWindow>,
    rows: usize,
    cols: usize,
}

impl CropGrid {
    /// Windows in row-major order (top-left first, bottom-right last).
    pub fn windows(&self) -> &[CropWindow] {
        &self.windows
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Number of grid steps needed to cover `extent` with `crop`-sized
/// windows every `stride` pixels, always at least 1.
fn steps(extent: usize, crop: usize, stride: usize) -> usize {
    if extent <= crop {
        1
    } else {
        (extent - crop).div_ceil(stride) + 1
    }
}

/// Build the crop grid for a `height` x `width` frame.
///
/// Window (r, c) starts at `min(r * stride, extent - crop)` on each
/// axis, so the last row/column is clamped against the far edge rather
/// than running out of bounds. Returns `InvalidGeometry` when the frame
/// is smaller than the crop, or the stride is zero or larger than the
/// crop (which would leave uncovered gaps between windows).
pub fn crop_grid(
    height: usize,
    width: usize,
    crop_size: usize,
    stride: usize,
) -> Result<CropGrid, TilingError> {
    if height < crop_size || width < crop_size || stride == 0 || stride > crop_size {
        return Err(TilingError::InvalidGeometry {
            height,
            width,
            crop_size,
            stride,
        });
    }

    let rows = steps(height, crop_size, stride);
    let cols = steps(width, crop_size, stride);

    let mut windows = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        let y = (r * stride).min(height - crop_size);
        for c in 0..cols {
            let x = (c * stride).min(width - crop_size);
            windows.push(CropWindow {
                y,
                x,
                size: crop_size,
            });
        }
    }

    Ok(CropGrid {
        windows,
        rows,
        cols,
    })
}
