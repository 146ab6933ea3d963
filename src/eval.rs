//! Segmentation scoring against ground truth
//!
//! Per-class intersection-over-union in train-id space with an ignore
//! label, plus a trimap variant that restricts counting to a band
//! around ground-truth label boundaries.

use ndarray::Array2;

/// Label value excluded from scoring.
pub const IGNORE_LABEL: u8 = 255;

/// Per-class true-positive / false-positive / false-negative tallies.
#[derive(Debug, Clone)]
pub struct ClassCounts {
    tp: Vec<u64>,
    fp: Vec<u64>,
    fn_: Vec<u64>,
}

impl ClassCounts {
    pub fn new(num_classes: usize) -> Self {
        Self {
            tp: vec![0; num_classes],
            fp: vec![0; num_classes],
            fn_: vec![0; num_classes],
        }
    }

    /// Fold another tally (e.g. from a different frame) into this one.
    pub fn merge(&mut self, other: &ClassCounts) {
        for c in 0..self.tp.len() {
            self.tp[c] += other.tp[c];
            self.fp[c] += other.fp[c];
            self.fn_[c] += other.fn_[c];
        }
    }

    /// Per-class IoU, `None` for classes that never appear in either
    /// prediction or ground truth.
    pub fn iou(&self) -> Vec<Option<f64>> {
        (0..self.tp.len())
            .map(|c| {
                let denom = self.tp[c] + self.fp[c] + self.fn_[c];
                if denom == 0 {
                    None
                } else {
                    Some(self.tp[c] as f64 / denom as f64)
                }
            })
            .collect()
    }

    /// Mean IoU over the classes that appeared; `None` if none did.
    pub fn mean_iou(&self) -> Option<f64> {
        let ious: Vec<f64> = self.iou().into_iter().flatten().collect();
        if ious.is_empty() {
            None
        } else {
            Some(ious.iter().sum::<f64>() / ious.len() as f64)
        }
    }
}

/// Scores predicted label maps against ground truth.
pub struct SegmentationScorer {
    num_classes: usize,
}

impl SegmentationScorer {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }

    /// Tally tp/fp/fn over one frame. Pixels whose ground truth is the
    /// ignore label are skipped entirely.
    pub fn count(&self, pred: &Array2<u8>, gt: &Array2<u8>) -> ClassCounts {
        let mut counts = ClassCounts::new(self.num_classes);
        for (p, g) in pred.iter().zip(gt.iter()) {
            let (p, g) = (*p as usize, *g as usize);
            if g == IGNORE_LABEL as usize || g >= self.num_classes {
                continue;
            }
            if p == g {
                counts.tp[g] += 1;
            } else {
                counts.fn_[g] += 1;
                if p < self.num_classes {
                    counts.fp[p] += 1;
                }
            }
        }
        counts
    }

    /// Tally tp/fp/fn inside the boundary band only: pixels farther
    /// than `trimap / 2` (Chebyshev distance) from any ground-truth
    /// label boundary are treated as ignore.
    pub fn count_trimap(
        &self,
        pred: &Array2<u8>,
        gt: &Array2<u8>,
        trimap: usize,
    ) -> ClassCounts {
        let band = boundary_band(gt, trimap);
        let masked_gt = Array2::from_shape_fn(gt.raw_dim(), |(y, x)| {
            if band[[y, x]] {
                gt[[y, x]]
            } else {
                IGNORE_LABEL
            }
        });
        self.count(pred, &masked_gt)
    }
}

/// Mark pixels within `trimap / 2` of a label boundary. A boundary
/// pixel is one whose label differs from any 4-neighbor.
fn boundary_band(gt: &Array2<u8>, trimap: usize) -> Array2<bool> {
    let (h, w) = gt.dim();
    let mut boundary = Array2::from_elem((h, w), false);
    for y in 0..h {
        for x in 0..w {
            let v = gt[[y, x]];
            let differs = (y > 0 && gt[[y - 1, x]] != v)
                || (y + 1 < h && gt[[y + 1, x]] != v)
                || (x > 0 && gt[[y, x - 1]] != v)
                || (x + 1 < w && gt[[y, x + 1]] != v);
            boundary[[y, x]] = differs;
        }
    }

    let radius = trimap / 2;
    if radius == 0 {
        return boundary;
    }

    let mut band = Array2::from_elem((h, w), false);
    for y in 0..h {
        for x in 0..w {
            if !boundary[[y, x]] {
                continue;
            }
            let y0 = y.saturating_sub(radius);
            let y1 = (y + radius + 1).min(h);
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius + 1).min(w);
            for by in y0..y1 {
                for bx in x0..x1 {
                    band[[by, bx]] = true;
                }
            }
        }
    }
    band
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_perfect_prediction_scores_one() {
        let gt = array![[0u8, 0, 1], [1, 1, 2]];
        let scorer = SegmentationScorer::new(3);

        let counts = scorer.count(&gt, &gt);
        let ious = counts.iou();
        assert_eq!(ious, vec![Some(1.0), Some(1.0), Some(1.0)]);
        assert_abs_diff_eq!(counts.mean_iou().unwrap(), 1.0);
    }

    #[test]
    fn test_iou_counts() {
        // gt has three 0s and one 1; pred misses one 0 and invents a 1.
        let gt = array![[0u8, 0], [0, 1]];
        let pred = array![[0u8, 1], [0, 1]];
        let scorer = SegmentationScorer::new(2);

        let counts = scorer.count(&pred, &gt);
        let ious = counts.iou();
        // class 0: tp 2, fn 1, fp 0 -> 2/3. class 1: tp 1, fp 1 -> 1/2.
        assert_abs_diff_eq!(ious[0].unwrap(), 2.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(ious[1].unwrap(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_ignore_label_skipped() {
        let gt = array![[255u8, 0], [255, 0]];
        let pred = array![[1u8, 0], [1, 0]];
        let scorer = SegmentationScorer::new(2);

        let counts = scorer.count(&pred, &gt);
        let ious = counts.iou();
        // Disagreements under ignore pixels never count.
        assert_eq!(ious[0], Some(1.0));
        assert_eq!(ious[1], None);
    }

    #[test]
    fn test_absent_class_excluded_from_mean() {
        let gt = array![[0u8, 0]];
        let pred = array![[0u8, 0]];
        let scorer = SegmentationScorer::new(19);

        let counts = scorer.count(&pred, &gt);
        assert_abs_diff_eq!(counts.mean_iou().unwrap(), 1.0);
    }

    #[test]
    fn test_merge_accumulates_frames() {
        let scorer = SegmentationScorer::new(2);
        let gt_a = array![[0u8, 0]];
        let pred_a = array![[0u8, 1]];
        let gt_b = array![[0u8, 0]];
        let pred_b = array![[0u8, 0]];

        let mut counts = scorer.count(&pred_a, &gt_a);
        counts.merge(&scorer.count(&pred_b, &gt_b));

        // class 0: tp 3, fn 1 -> 3/4 across both frames.
        assert_abs_diff_eq!(counts.iou()[0].unwrap(), 0.75, epsilon = 1e-9);
    }

    #[test]
    fn test_uniform_frame_has_no_boundary_band() {
        let gt = Array2::from_elem((6, 6), 1u8);
        let pred = Array2::from_elem((6, 6), 0u8);
        let scorer = SegmentationScorer::new(2);

        // No boundaries anywhere, so everything is masked out and no
        // error is counted even though the prediction is fully wrong.
        let counts = scorer.count_trimap(&pred, &gt, 4);
        assert_eq!(counts.mean_iou(), None);
    }

    #[test]
    fn test_trimap_band_limits_counting() {
        // Vertical edge down the middle of an 8-wide strip.
        let gt = Array2::from_shape_fn((4, 8), |(_, x)| if x < 4 { 0u8 } else { 1 });
        // Prediction wrong only at the far left column, well outside a
        // narrow band around the edge.
        let pred = Array2::from_shape_fn((4, 8), |(_, x)| {
            if x == 0 {
                1u8
            } else if x < 4 {
                0
            } else {
                1
            }
        });
        let scorer = SegmentationScorer::new(2);

        let narrow = scorer.count_trimap(&pred, &gt, 2);
        assert_abs_diff_eq!(narrow.mean_iou().unwrap(), 1.0);

        // A wide band reaches the bad column and the score drops.
        let wide = scorer.count_trimap(&pred, &gt, 8);
        assert!(wide.mean_iou().unwrap() < 1.0);
    }
}
