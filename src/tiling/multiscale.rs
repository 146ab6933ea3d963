//! Multi-scale tiled inference
//!
//! Runs the crop grid at each configured scale, averages overlapping
//! crop scores, resamples every per-scale probability map back to the
//! canonical resolution, and sums the maps elementwise. The final label
//! map is the per-pixel argmax of the summed probabilities.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::Array3;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::models::scorer::{score_forward, score_with_flip, CropSample, CropScorer};
use crate::tiling::accumulator::ScoreAccumulator;
use crate::tiling::error::TilingError;
use crate::tiling::grid::crop_grid;
use crate::types::{ProbabilityMap, SequenceSample};

/// Result of one frame's multi-scale run.
#[derive(Debug)]
pub struct MultiScaleRun {
    /// Summed per-scale probabilities at canonical resolution.
    pub probabilities: ProbabilityMap,
    /// Crops scored across all scales.
    pub crops_scored: usize,
    /// Wall time per scale, including sequence loading.
    pub scale_times: Vec<(f64, Duration)>,
}

/// Tiled inference over a fixed list of scales.
pub struct MultiScaleCombiner {
    scales: Vec<f64>,
    crop_size: usize,
    stride: usize,
    canonical_h: usize,
    canonical_w: usize,
    flip: bool,
}

impl MultiScaleCombiner {
    pub fn new(
        scales: Vec<f64>,
        crop_size: usize,
        stride: usize,
        canonical_h: usize,
        canonical_w: usize,
        flip: bool,
    ) -> Self {
        Self {
            scales,
            crop_size,
            stride,
            canonical_h,
            canonical_w,
            flip,
        }
    }

    /// Run the crop grid over one already-scaled sequence sample.
    /// Returns the averaged probability map cropped to the valid
    /// region, plus the number of crops scored.
    pub fn run_scale(
        &self,
        scorer: &mut dyn CropScorer,
        sample: &SequenceSample,
    ) -> Result<(Array3<f32>, usize), TilingError> {
        let target = sample.target();
        let (h, w) = (target.height(), target.width());
        let grid = crop_grid(h, w, self.crop_size, self.stride)?;

        let mut acc = ScoreAccumulator::new(scorer.num_classes(), h, w);
        for window in grid.windows() {
            let crop =
                CropSample::from_sequence(sample, window.y, window.x, window.size);
            let scores = if self.flip {
                score_with_flip(scorer, &crop)?
            } else {
                score_forward(scorer, &crop)?
            };
            acc.add(window, &scores);
        }

        debug!(
            crops = grid.len(),
            height = h,
            width = w,
            "scored crop grid"
        );

        let probs = acc.normalize(target.valid_h(), target.valid_w())?;
        Ok((probs, grid.len()))
    }

    /// Run every scale and sum the resampled per-scale probability maps
    /// elementwise at canonical resolution, without reweighting. Each
    /// pixel then carries total mass equal to the number of scales,
    /// which leaves the argmax unchanged.
    ///
    /// `fetch` loads the sequence sample resized for a given scale.
    /// Any error aborts the frame; no partial map is returned.
    pub fn run<F>(&self, scorer: &mut dyn CropScorer, mut fetch: F) -> Result<MultiScaleRun>
    where
        F: FnMut(f64) -> Result<SequenceSample>,
    {
        let num_classes = scorer.num_classes();
        let mut total =
            Array3::<f32>::zeros((num_classes, self.canonical_h, self.canonical_w));
        let mut crops_scored = 0;
        let mut scale_times = Vec::with_capacity(self.scales.len());

        for &scale in &self.scales {
            let started = Instant::now();
            let sample = fetch(scale)
                .with_context(|| format!("loading sequence at scale {scale}"))?;
            let (probs, crops) = self
                .run_scale(scorer, &sample)
                .with_context(|| format!("tiled inference at scale {scale}"))?;
            let resampled =
                resample_probability_map(&probs, self.canonical_h, self.canonical_w);
            total += &resampled;
            crops_scored += crops;
            scale_times.push((scale, started.elapsed()));
            debug!(scale, crops, "accumulated scale");
        }

        Ok(MultiScaleRun {
            probabilities: ProbabilityMap::new(total),
            crops_scored,
            scale_times,
        })
    }
}

/// Resample a `[num_classes, h, w]` probability map to the target
/// resolution with bilinear filtering, one class plane at a time.
pub fn resample_probability_map(
    probs: &Array3<f32>,
    target_h: usize,
    target_w: usize,
) -> Array3<f32> {
    let (k, h, w) = probs.dim();
    if h == target_h && w == target_w {
        return probs.clone();
    }

    let mut out = Array3::<f32>::zeros((k, target_h, target_w));
    for c in 0..k {
        let plane: Vec<f32> = probs.index_axis(ndarray::Axis(0), c).iter().copied().collect();
        let buf: ImageBuffer<Luma<f32>, Vec<f32>> =
            match ImageBuffer::from_raw(w as u32, h as u32, plane) {
                Some(b) => b,
                // plane length always matches w * h
                None => continue,
            };
        let resized = imageops::resize(
            &buf,
            target_w as u32,
            target_h as u32,
            FilterType::Triangle,
        );
        let data = resized.into_raw();
        for y in 0..target_h {
            for x in 0..target_w {
                out[[c, y, x]] = data[y * target_w + x];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameTensor;
    use approx::assert_abs_diff_eq;
    use ndarray::Axis;

    /// Emits a one-hot map keyed off channel 0 of the target crop:
    /// class 0 where the pixel value is below the threshold, class 1
    /// otherwise. Scores are large so the flip fusion stays one-hot.
    struct ThresholdScorer {
        num_classes: usize,
        threshold: f32,
    }

    impl CropScorer for ThresholdScorer {
        fn num_classes(&self) -> usize {
            self.num_classes
        }

        fn score(&mut self, sample: &CropSample) -> Result<Array3<f32>, TilingError> {
            let target = &sample.frames[sample.frames.len() - 1];
            let size = sample.size;
            let mut scores = Array3::zeros((self.num_classes, size, size));
            for y in 0..size {
                for x in 0..size {
                    let class = if target[[0, y, x]] < self.threshold { 0 } else { 1 };
                    scores[[class, y, x]] = 1000.0;
                }
            }
            Ok(scores)
        }
    }

    fn sample_from_frame(data: Array3<f32>, valid_h: usize, valid_w: usize) -> SequenceSample {
        SequenceSample {
            frames: vec![FrameTensor::new(data, valid_h, valid_w)],
            flows: vec![],
        }
    }

    #[test]
    fn test_single_scale_single_crop_reduces_to_one_softmax() {
        // crop covers the whole frame at scale 1.0: the output must be
        // exactly the softmax of the single crop score.
        let frame = Array3::from_shape_fn((1, 16, 16), |(_, y, _)| y as f32);
        let combiner = MultiScaleCombiner::new(vec![1.0], 16, 8, 16, 16, false);
        let mut scorer = ThresholdScorer {
            num_classes: 2,
            threshold: 8.0,
        };

        let run = combiner
            .run(&mut scorer, |_| Ok(sample_from_frame(frame.clone(), 16, 16)))
            .unwrap();
        assert_eq!(run.crops_scored, 1);

        let probs = run.probabilities;
        let labels = probs.argmax();
        for y in 0..16 {
            for x in 0..16 {
                let expected = if y < 8 { 0 } else { 1 };
                assert_eq!(labels.data()[[y, x]], expected, "at ({y}, {x})");
            }
        }
        // One-hot softmax of +-1000 logits saturates.
        assert_abs_diff_eq!(probs.data()[[0, 0, 0]], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(probs.data()[[1, 15, 0]], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_cross_scale_sum_carries_one_unit_per_scale() {
        let frame = Array3::from_shape_fn((1, 16, 16), |(_, y, _)| y as f32);
        let combiner = MultiScaleCombiner::new(vec![1.0, 1.0], 16, 8, 16, 16, true);
        let mut scorer = ThresholdScorer {
            num_classes: 2,
            threshold: 8.0,
        };

        let run = combiner
            .run(&mut scorer, |_| Ok(sample_from_frame(frame.clone(), 16, 16)))
            .unwrap();
        assert_eq!(run.scale_times.len(), 2);

        // Each scale contributes a softmax distribution, so the
        // unweighted sum holds mass 2.0 at every pixel.
        let sums = run.probabilities.data().sum_axis(Axis(0));
        for &s in sums.iter() {
            assert_abs_diff_eq!(s, 2.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_tiled_run_matches_banded_frame() {
        // 1000x1000 frame, crop 713, stride 476: windows start at 0 and
        // 287 on each axis. Channel 0 carries the row index and the
        // scorer emits one-hot of (y < 500), so the final label map must
        // be the row band mask exactly, seams included.
        let frame = Array3::from_shape_fn((1, 1000, 1000), |(_, y, _)| y as f32);
        let combiner = MultiScaleCombiner::new(vec![1.0], 713, 476, 1000, 1000, true);
        let mut scorer = ThresholdScorer {
            num_classes: 2,
            threshold: 500.0,
        };

        let run = combiner
            .run(&mut scorer, |_| {
                Ok(sample_from_frame(frame.clone(), 1000, 1000))
            })
            .unwrap();
        // 2x2 grid of windows at 0 and 287 on each axis.
        assert_eq!(run.crops_scored, 4);

        let labels = run.probabilities.argmax();
        for y in 0..1000 {
            let expected = if y < 500 { 0 } else { 1 };
            for x in 0..1000 {
                assert_eq!(labels.data()[[y, x]], expected, "at ({y}, {x})");
            }
        }
    }

    #[test]
    fn test_geometry_error_surfaces() {
        let frame = Array3::zeros((1, 8, 8));
        let combiner = MultiScaleCombiner::new(vec![1.0], 16, 8, 8, 8, false);
        let mut scorer = ThresholdScorer {
            num_classes: 2,
            threshold: 0.5,
        };

        let err = combiner
            .run(&mut scorer, |_| Ok(sample_from_frame(frame.clone(), 8, 8)))
            .unwrap_err();
        assert!(err.to_string().contains("scale"));
    }

    #[test]
    fn test_resample_identity_when_same_size() {
        let probs = Array3::from_shape_fn((2, 4, 4), |(c, y, x)| (c + y + x) as f32);
        let out = resample_probability_map(&probs, 4, 4);
        assert_eq!(out, probs);
    }

    #[test]
    fn test_resample_constant_plane_stays_constant() {
        let probs = Array3::from_elem((1, 4, 4), 0.25);
        let out = resample_probability_map(&probs, 8, 8);
        for &v in out.iter() {
            assert_abs_diff_eq!(v, 0.25, epsilon = 1e-5);
        }
    }
}
