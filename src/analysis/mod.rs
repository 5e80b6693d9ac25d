// src/analysis/mod.rs
//
// Scoring and mask combination stages.
//
// Signal flow:
//   per-method (mask, stats) → confidence ─┐
//                                          ├→ fusion → postprocess → final mask
//   source image ──────────────────────────┘                 │
//                                       scenario ← spatial ←─┘

pub mod confidence;
pub mod fusion;
pub mod postprocess;
pub mod scenario;
pub mod spatial;

pub use confidence::ConfidenceBreakdown;
pub use fusion::{fuse, fusion_weights, FusionResult};
pub use scenario::detect_scenarios;
pub use spatial::{analyze_density, detection_confidence, DensityAnalysis, DensityClass};
