//! Type definitions for the segmentation pipeline

pub mod frame;
pub mod labelmap;

pub use frame::{FlowField, FrameTensor, SequenceSample};
pub use labelmap::{LabelMap, ProbabilityMap, CLASS_PALETTE, TRAIN_ID_TO_LABEL_ID};
