//! Probability and label maps produced by the aggregator

use ndarray::{Array2, Array3};

/// Train-id to regular label-id mapping for the 19 evaluated
/// Cityscapes classes.
pub const TRAIN_ID_TO_LABEL_ID: [u8; 19] = [
    7, 8, 11, 12, 13, 17, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 31, 32, 33,
];

/// Color palette for the 19 train-id classes, RGB.
pub const CLASS_PALETTE: [[u8; 3]; 19] = [
    [128, 64, 128],  // road
    [244, 35, 232],  // sidewalk
    [70, 70, 70],    // building
    [102, 102, 156], // wall
    [190, 153, 153], // fence
    [153, 153, 153], // pole
    [250, 170, 30],  // traffic light
    [220, 220, 0],   // traffic sign
    [107, 142, 35],  // vegetation
    [152, 251, 152], // terrain
    [70, 130, 180],  // sky
    [220, 20, 60],   // person
    [255, 0, 0],     // rider
    [0, 0, 142],     // car
    [0, 0, 70],      // truck
    [0, 60, 100],    // bus
    [0, 80, 100],    // train
    [0, 0, 230],     // motorcycle
    [119, 11, 32],   // bicycle
];

/// Per-pixel class probabilities, `[num_classes, height, width]`.
#[derive(Debug, Clone)]
pub struct ProbabilityMap {
    data: Array3<f32>,
}

impl ProbabilityMap {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn num_classes(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }

    /// Per-pixel argmax over the class axis. Ties resolve to the lowest
    /// class index.
    pub fn argmax(&self) -> LabelMap {
        let (k, h, w) = self.data.dim();
        let mut labels = Array2::<u8>::zeros((h, w));
        for y in 0..h {
            for x in 0..w {
                let mut best = 0usize;
                let mut best_val = self.data[[0, y, x]];
                for c in 1..k {
                    let v = self.data[[c, y, x]];
                    if v > best_val {
                        best_val = v;
                        best = c;
                    }
                }
                labels[[y, x]] = best as u8;
            }
        }
        LabelMap { data: labels }
    }
}

/// Per-pixel train-id labels, `[height, width]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    data: Array2<u8>,
}

impl LabelMap {
    pub fn new(data: Array2<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Array2<u8> {
        &self.data
    }

    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    /// Remap train ids to the dataset's regular label ids. Ids outside
    /// the train-id range pass through unchanged.
    pub fn to_label_ids(&self) -> Array2<u8> {
        self.data.mapv(|id| {
            TRAIN_ID_TO_LABEL_ID
                .get(id as usize)
                .copied()
                .unwrap_or(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_argmax_picks_highest_class() {
        let data = Array3::from_shape_vec(
            (3, 1, 2),
            vec![
                0.1, 0.7, // class 0
                0.8, 0.2, // class 1
                0.1, 0.1, // class 2
            ],
        )
        .unwrap();
        let labels = ProbabilityMap::new(data).argmax();
        assert_eq!(labels.data(), &array![[1u8, 0u8]]);
    }

    #[test]
    fn test_argmax_tie_goes_to_lowest_index() {
        let data = Array3::from_elem((4, 2, 2), 0.25);
        let labels = ProbabilityMap::new(data).argmax();
        assert!(labels.data().iter().all(|&l| l == 0));
    }

    #[test]
    fn test_train_id_remap() {
        let labels = LabelMap::new(array![[0u8, 13u8], [18u8, 255u8]]);
        let ids = labels.to_label_ids();
        assert_eq!(ids, array![[7u8, 26u8], [33u8, 255u8]]);
    }
}
