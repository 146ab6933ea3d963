//! Per-crop scorer boundary and forward/flip score fusion

use anyhow::anyhow;
use ndarray::{s, Array3, Axis, Zip};

use crate::tiling::error::TilingError;
use crate::types::{FlowField, FrameTensor, SequenceSample};

/// One aligned crop cut out of a sequence sample: the target-frame crop
/// plus the matching crops of the previous frames and the flow fields
/// between them, all in `[channels, size, size]` layout.
#[derive(Debug, Clone)]
pub struct CropSample {
    pub frames: Vec<Array3<f32>>,
    pub flows: Vec<Array3<f32>>,
    pub size: usize,
}

impl CropSample {
    /// Cut the window at `(y, x)` out of every frame and flow field of
    /// a sequence sample.
    pub fn from_sequence(sample: &SequenceSample, y: usize, x: usize, size: usize) -> Self {
        let crop_frame = |f: &FrameTensor| {
            f.data()
                .slice(s![.., y..y + size, x..x + size])
                .to_owned()
        };
        let crop_flow = |f: &FlowField| {
            f.data()
                .slice(s![.., y..y + size, x..x + size])
                .to_owned()
        };
        Self {
            frames: sample.frames.iter().map(crop_frame).collect(),
            flows: sample.flows.iter().map(crop_flow).collect(),
            size,
        }
    }

    /// Mirror the sample for the flipped scoring pass: frames are
    /// flipped left-right, flow vectors have their x-component negated.
    pub fn flipped(&self) -> Self {
        let frames = self
            .frames
            .iter()
            .map(|f| f.slice(s![.., .., ..;-1]).to_owned())
            .collect();
        let flows = self
            .flows
            .iter()
            .map(|f| {
                let mut neg = f.clone();
                neg.index_axis_mut(Axis(0), 0).mapv_inplace(|v| -v);
                neg
            })
            .collect();
        Self {
            frames,
            flows,
            size: self.size,
        }
    }
}

/// Opaque per-crop scorer. Implementations return a raw (pre-softmax)
/// `[num_classes, size, size]` score map for one crop sample.
pub trait CropScorer {
    fn num_classes(&self) -> usize;

    fn score(&mut self, sample: &CropSample) -> Result<Array3<f32>, TilingError>;
}

/// Numerically stable softmax over the class axis, in place. The
/// per-pixel maximum is subtracted before exponentiating so scores in
/// the 1e6 range do not overflow.
pub fn softmax_classes(scores: &mut Array3<f32>) {
    let max = scores.map_axis(Axis(0), |col| {
        col.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    });
    for mut plane in scores.outer_iter_mut() {
        Zip::from(&mut plane).and(&max).for_each(|v, &m| {
            *v = (*v - m).exp();
        });
    }
    let total = scores.sum_axis(Axis(0));
    for mut plane in scores.outer_iter_mut() {
        plane /= &total;
    }
}

/// Score a crop forward and flipped, and fuse the two passes.
///
/// The flipped score map is mirrored back into forward orientation and
/// added to the forward map; a single softmax over the class axis is
/// applied to the sum, never to each pass separately.
pub fn score_with_flip(
    scorer: &mut dyn CropScorer,
    sample: &CropSample,
) -> Result<Array3<f32>, TilingError> {
    let fwd = scorer.score(sample)?;
    validate_shape(&fwd, scorer.num_classes(), sample.size)?;

    let flip = scorer.score(&sample.flipped())?;
    validate_shape(&flip, scorer.num_classes(), sample.size)?;

    let mut combined = fwd + flip.slice(s![.., .., ..;-1]);
    softmax_classes(&mut combined);
    Ok(combined)
}

/// Score a crop in a single forward pass and softmax the result.
pub fn score_forward(
    scorer: &mut dyn CropScorer,
    sample: &CropSample,
) -> Result<Array3<f32>, TilingError> {
    let mut scores = scorer.score(sample)?;
    validate_shape(&scores, scorer.num_classes(), sample.size)?;
    softmax_classes(&mut scores);
    Ok(scores)
}

fn validate_shape(
    scores: &Array3<f32>,
    num_classes: usize,
    size: usize,
) -> Result<(), TilingError> {
    let shape = scores.shape();
    if shape != [num_classes, size, size] {
        return Err(TilingError::Scorer(anyhow!(
            "score map shape {:?} does not match [{}, {}, {}]",
            shape,
            num_classes,
            size,
            size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    /// Scorer returning a fixed map regardless of input.
    struct ConstScorer {
        map: Array3<f32>,
    }

    impl CropScorer for ConstScorer {
        fn num_classes(&self) -> usize {
            self.map.shape()[0]
        }

        fn score(&mut self, _sample: &CropSample) -> Result<Array3<f32>, TilingError> {
            Ok(self.map.clone())
        }
    }

    fn empty_sample(size: usize) -> CropSample {
        CropSample {
            frames: vec![Array3::zeros((3, size, size))],
            flows: vec![],
            size,
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut scores = Array3::from_shape_fn((5, 4, 4), |(c, y, x)| {
            (c * 13 + y * 7 + x) as f32 * 0.37 - 3.0
        });
        softmax_classes(&mut scores);

        let sums = scores.sum_axis(Axis(0));
        for &s in sums.iter() {
            assert_abs_diff_eq!(s, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_softmax_stable_for_huge_scores() {
        let mut scores = Array3::from_shape_fn((3, 2, 2), |(c, y, x)| {
            if (c + y + x) % 2 == 0 {
                1e6
            } else {
                -1e6
            }
        });
        softmax_classes(&mut scores);

        assert!(scores.iter().all(|v| v.is_finite()));
        let sums = scores.sum_axis(Axis(0));
        for &s in sums.iter() {
            assert_abs_diff_eq!(s, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_flip_fusion_is_softmax_of_sum() {
        // Map asymmetric in x so the mirror matters. ConstScorer ignores
        // its input, so the fused result must equal
        // softmax(map + mirror(map)).
        let map = Array3::from_shape_fn((2, 2, 2), |(c, _, x)| (c * 3 + x) as f32);
        let mut scorer = ConstScorer { map: map.clone() };
        let sample = empty_sample(2);

        let fused = score_with_flip(&mut scorer, &sample).unwrap();

        let mut expected = map.clone() + map.slice(s![.., .., ..;-1]);
        softmax_classes(&mut expected);
        for (a, b) in fused.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_flipped_sample_negates_flow_x_only() {
        let frames = vec![Array3::from_shape_fn((1, 1, 3), |(_, _, x)| x as f32)];
        let flows = vec![Array3::from_shape_fn((2, 1, 3), |(c, _, x)| {
            if c == 0 {
                (x as f32) + 1.0
            } else {
                10.0
            }
        })];
        let sample = CropSample {
            frames,
            flows,
            size: 3,
        };

        let flipped = sample.flipped();

        // Frame pixels mirrored.
        assert_eq!(flipped.frames[0][[0, 0, 0]], 2.0);
        assert_eq!(flipped.frames[0][[0, 0, 2]], 0.0);
        // Flow x negated in place, y untouched, neither mirrored.
        assert_eq!(flipped.flows[0][[0, 0, 0]], -1.0);
        assert_eq!(flipped.flows[0][[0, 0, 2]], -3.0);
        assert_eq!(flipped.flows[0][[1, 0, 1]], 10.0);
    }

    #[test]
    fn test_malformed_shape_is_scorer_failure() {
        let mut scorer = ConstScorer {
            map: Array3::zeros((2, 3, 3)),
        };
        let sample = empty_sample(4);

        let err = score_with_flip(&mut scorer, &sample).unwrap_err();
        assert!(matches!(err, TilingError::Scorer(_)));
    }
}
