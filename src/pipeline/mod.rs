// src/pipeline/mod.rs

pub mod live;
pub mod metrics;

pub use live::{LiveDetectionLoop, LiveFrame, LiveSettings};
pub use metrics::{MetricsSummary, PipelineMetrics};
