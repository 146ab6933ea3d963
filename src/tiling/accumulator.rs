//! Overlap accumulator for per-crop score maps
//!
//! Overlapping crops each contribute a full class-score map for their
//! window. The accumulator sums contributions and per-pixel visit
//! counts, then divides, so seams between crops are averaged rather
//! than overwritten.

use ndarray::{s, Array2, Array3};

use crate::tiling::error::TilingError;
use crate::tiling::grid::CropWindow;

/// Running sum and count over the padded frame extent.
pub struct ScoreAccumulator {
    sum: Array3<f32>,
    count: Array2<f32>,
}

impl ScoreAccumulator {
    /// Zero-initialised accumulator for a `[num_classes, height, width]`
    /// padded extent.
    pub fn new(num_classes: usize, height: usize, width: usize) -> Self {
        Self {
            sum: Array3::zeros((num_classes, height, width)),
            count: Array2::zeros((height, width)),
        }
    }

    /// Add one crop's combined score map at its window location.
    pub fn add(&mut self, window: &CropWindow, scores: &Array3<f32>) {
        let (y, x, size) = (window.y, window.x, window.size);
        let mut region = self.sum.slice_mut(s![.., y..y + size, x..x + size]);
        region += scores;
        let mut counts = self.count.slice_mut(s![y..y + size, x..x + size]);
        counts += 1.0;
    }

    /// Divide sums by counts over the valid (pre-padding) region and
    /// return the averaged `[num_classes, valid_h, valid_w]` map.
    ///
    /// Every pixel of the valid region must have been covered by at
    /// least one crop; an uncovered pixel is an `AccumulatorCoverage`
    /// error, never a silent division by zero.
    pub fn normalize(
        self,
        valid_h: usize,
        valid_w: usize,
    ) -> Result<Array3<f32>, TilingError> {
        let count = self.count.slice(s![..valid_h, ..valid_w]);
        for ((y, x), &c) in count.indexed_iter() {
            if c <= 0.0 {
                return Err(TilingError::AccumulatorCoverage { y, x });
            }
        }

        let mut mean = self.sum.slice(s![.., ..valid_h, ..valid_w]).to_owned();
        for mut plane in mean.outer_iter_mut() {
            plane /= &count;
        }
        Ok(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::grid::crop_grid;
    use approx::assert_abs_diff_eq;

    fn constant_scores(num_classes: usize, size: usize, value: f32) -> Array3<f32> {
        Array3::from_elem((num_classes, size, size), value)
    }

    #[test]
    fn test_overlap_is_averaged() {
        // Two 4-pixel windows overlapping on columns 2..4 of a 4x6 strip.
        let mut acc = ScoreAccumulator::new(2, 4, 6);
        let w0 = CropWindow { y: 0, x: 0, size: 4 };
        let w1 = CropWindow { y: 0, x: 2, size: 4 };

        acc.add(&w0, &constant_scores(2, 4, 1.0));
        acc.add(&w1, &constant_scores(2, 4, 3.0));

        let mean = acc.normalize(4, 6).unwrap();

        // Only w0: 1.0. Overlap: (1 + 3) / 2 = 2.0. Only w1: 3.0.
        assert_abs_diff_eq!(mean[[0, 0, 0]], 1.0);
        assert_abs_diff_eq!(mean[[1, 2, 3]], 2.0);
        assert_abs_diff_eq!(mean[[0, 3, 5]], 3.0);
    }

    #[test]
    fn test_mean_of_contributing_crops() {
        let mut acc = ScoreAccumulator::new(1, 3, 3);
        let w = CropWindow { y: 0, x: 0, size: 3 };

        acc.add(&w, &constant_scores(1, 3, 2.0));
        acc.add(&w, &constant_scores(1, 3, 4.0));
        acc.add(&w, &constant_scores(1, 3, 9.0));

        let mean = acc.normalize(3, 3).unwrap();
        for &v in mean.iter() {
            assert_abs_diff_eq!(v, 5.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_full_grid_covers_valid_region() {
        // Padded extent 713x713 with a 700x690 valid region.
        let grid = crop_grid(713, 713, 713, 476).unwrap();
        let mut acc = ScoreAccumulator::new(3, 713, 713);
        for win in grid.windows() {
            acc.add(win, &constant_scores(3, 713, 0.5));
        }
        assert!(acc.normalize(700, 690).is_ok());
    }

    #[test]
    fn test_uncovered_pixel_is_an_error() {
        let mut acc = ScoreAccumulator::new(1, 4, 4);
        let w = CropWindow { y: 0, x: 0, size: 2 };
        acc.add(&w, &constant_scores(1, 2, 1.0));

        let err = acc.normalize(4, 4).unwrap_err();
        match err {
            TilingError::AccumulatorCoverage { y, x } => {
                assert_eq!((y, x), (0, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_padding_outside_valid_region_ignored() {
        // Coverage holes in the padded margin are fine as long as the
        // valid region is fully covered.
        let mut acc = ScoreAccumulator::new(1, 6, 6);
        let w = CropWindow { y: 0, x: 0, size: 4 };
        acc.add(&w, &constant_scores(1, 4, 1.0));

        assert!(acc.normalize(4, 4).is_ok());
    }
}
