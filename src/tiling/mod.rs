//! Tiled multi-scale inference aggregation

pub mod accumulator;
pub mod error;
pub mod grid;
pub mod multiscale;

pub use accumulator::ScoreAccumulator;
pub use error::TilingError;
pub use grid::{crop_grid, CropGrid, CropWindow};
pub use multiscale::{MultiScaleCombiner, MultiScaleRun};
