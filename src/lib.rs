// src/lib.rs
//
// Multi-method grass detection: color, texture and auxiliary classifiers,
// an optional segmentation model, weighted fusion, mode-dependent
// postprocessing and an online-learned confidence boost.

pub mod adaptive;
pub mod analysis;
pub mod color_analysis;
pub mod config;
pub mod detection;
pub mod detector;
pub mod frame_buffer;
pub mod imaging;
#[cfg(feature = "onnx")]
pub mod inference;
pub mod interface;
pub mod mask;
pub mod mode;
pub mod pipeline;
pub mod preprocessing;
pub mod report;
pub mod types;

pub use detector::{Detection, GrassDetector};
pub use mask::{Mask, ProbabilityMap};
pub use types::{Config, DetectionMethod, DetectionStats, Mode};
