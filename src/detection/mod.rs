// src/detection/mod.rs
//
// Method bank: independent pixel classifiers plus the segmentation adapter.
//
//   color      → HSV band thresholding
//   texture    → gradient / filter-bank / LBP / variance fusion
//   auxiliary  → gradient-pattern + statistical-pattern (precision only)
//   model      → trained backend or analytic simulation

pub mod auxiliary;
pub mod color;
pub mod model;
pub mod simulation;
pub mod texture;

pub use auxiliary::{detect_gradient_patterns, detect_statistical_patterns};
pub use color::ColorClassifier;
pub use model::{
    ModelAvailability, ModelStatus, Prediction, SegmentationBackend, SegmentationModel,
};
pub use texture::{TextureClassifier, TextureWeights};
