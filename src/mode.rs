// src/mode.rs
//
// Mode controller: turns the active `Mode` into the concrete switches every
// component reads. Profiles are derived once per call and never mutated.

use crate::types::{Config, Mode};

#[derive(Debug, Clone, PartialEq)]
pub struct ModeProfile {
    pub mode: Mode,
    /// Working-resolution factor for the texture classifier.
    pub texture_scale: f32,
    pub use_filter_bank: bool,
    pub use_local_patterns: bool,
    pub fast_variance: bool,
    pub simple_confidence: bool,
    pub auxiliary_classifiers: bool,
    pub multi_scale: Vec<f32>,
    pub morphology_iterations: u32,
    pub watershed: bool,
    pub outlier_rejection: bool,
    pub precision_preprocess: bool,
    pub edge_refinement: bool,
}

impl ModeProfile {
    pub fn for_mode(mode: Mode, config: &Config) -> Self {
        match mode {
            Mode::Realtime => Self {
                mode,
                texture_scale: config.realtime.reduced_resolution,
                use_filter_bank: false,
                use_local_patterns: false,
                fast_variance: true,
                simple_confidence: true,
                auxiliary_classifiers: false,
                multi_scale: vec![1.0],
                morphology_iterations: 1,
                watershed: false,
                outlier_rejection: false,
                precision_preprocess: false,
                edge_refinement: false,
            },
            Mode::Precision => Self {
                mode,
                texture_scale: 1.0,
                use_filter_bank: true,
                use_local_patterns: true,
                fast_variance: false,
                simple_confidence: false,
                auxiliary_classifiers: true,
                multi_scale: config.precision.multi_scale.clone(),
                morphology_iterations: config.precision.morphology_iterations.max(1),
                watershed: config.precision.watershed,
                outlier_rejection: config.precision.outlier_rejection,
                precision_preprocess: true,
                edge_refinement: true,
            },
            Mode::Standard => Self {
                mode,
                texture_scale: 1.0,
                use_filter_bank: true,
                use_local_patterns: true,
                fast_variance: false,
                simple_confidence: false,
                auxiliary_classifiers: false,
                multi_scale: vec![1.0],
                morphology_iterations: 1,
                watershed: false,
                outlier_rejection: false,
                precision_preprocess: false,
                edge_refinement: false,
            },
        }
    }
}
