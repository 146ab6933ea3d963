//! Error types for the tiled inference aggregator

use thiserror::Error;

/// Errors produced while decomposing a frame into crops and merging
/// per-crop scores back into a full-frame probability map.
#[derive(Debug, Error)]
pub enum TilingError {
    /// The frame cannot be covered by the requested crop grid.
    #[error(
        "invalid crop geometry: frame {height}x{width}, crop {crop_size}, stride {stride}"
    )]
    InvalidGeometry {
        height: usize,
        width: usize,
        crop_size: usize,
        stride: usize,
    },

    /// A pixel inside the valid region was never covered by any crop.
    #[error("no crop covered pixel ({y}, {x}) inside the valid region")]
    AccumulatorCoverage { y: usize, x: usize },

    /// The per-crop scorer failed or returned a malformed score map.
    #[error("crop scorer failed: {0}")]
    Scorer(#[source] anyhow::Error),
}
