// src/detection/model.rs
//
// Segmentation model adapter.
//
// Availability is decided once at construction and reported as a tagged
// outcome instead of being discovered by failures on the heavy path:
//
//   Trained    → ONNX backend (cargo feature `onnx`)        → Available
//   Simulated  → deterministic analytic simulation            → Degraded
//   Unavailable→ caller falls back to the combined pipeline   → Unavailable

use super::simulation;
use crate::imaging;
use crate::mask::{Mask, ProbabilityMap};
use crate::types::{ModelConfig, TextureConfig};
use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{Luma, RgbImage};
use tracing::{debug, info, warn};

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// A trained network producing a per-pixel vegetation probability.
pub trait SegmentationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Probability map with the same dimensions as `image`.
    fn predict(&self, image: &RgbImage) -> Result<ProbabilityMap>;
}

pub enum ModelAvailability {
    Trained(Box<dyn SegmentationBackend>),
    Simulated,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Available,
    Degraded,
    Unavailable,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Available => "available",
            ModelStatus::Degraded => "degraded",
            ModelStatus::Unavailable => "unavailable",
        }
    }
}

/// Probability map plus a per-pixel confidence map of the same size.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub probability: ProbabilityMap,
    pub confidence: ProbabilityMap,
    pub scale: f32,
}

impl Prediction {
    pub fn mean_confidence(&self) -> f64 {
        imaging::mean_std(self.confidence.as_raw().iter().map(|&v| v as f64)).0
    }

    /// Resize both maps (bilinear).
    pub fn resized(&self, width: u32, height: u32) -> Prediction {
        if self.probability.dimensions() == (width, height) {
            return self.clone();
        }
        Prediction {
            probability: imageops::resize(&self.probability, width, height, FilterType::Triangle),
            confidence: imageops::resize(&self.confidence, width, height, FilterType::Triangle),
            scale: self.scale,
        }
    }

    /// Multiply the confidence map by `boost`, clamped to [0, 1].
    pub fn apply_boost(&mut self, boost: f64) {
        for c in self.confidence.iter_mut() {
            *c = (*c as f64 * boost).clamp(0.0, 1.0) as f32;
        }
    }
}

// ============================================================================
// ADAPTER
// ============================================================================

pub struct SegmentationModel {
    availability: ModelAvailability,
}

impl SegmentationModel {
    pub fn new(availability: ModelAvailability) -> Self {
        Self { availability }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        if let Some(path) = &config.path {
            match load_trained(path, config) {
                Ok(backend) => {
                    info!("✓ Segmentation model loaded: {}", backend.name());
                    return Self::new(ModelAvailability::Trained(backend));
                }
                Err(e) => warn!("⚠️ Segmentation model unavailable ({}): {:#}", path, e),
            }
        }
        if config.allow_simulation {
            info!("🧪 Using analytic segmentation simulation");
            Self::new(ModelAvailability::Simulated)
        } else {
            info!("Segmentation model disabled, model method falls back to combined");
            Self::new(ModelAvailability::Unavailable)
        }
    }

    pub fn status(&self) -> ModelStatus {
        match self.availability {
            ModelAvailability::Trained(_) => ModelStatus::Available,
            ModelAvailability::Simulated => ModelStatus::Degraded,
            ModelAvailability::Unavailable => ModelStatus::Unavailable,
        }
    }

    pub fn backend_name(&self) -> &str {
        match &self.availability {
            ModelAvailability::Trained(b) => b.name(),
            ModelAvailability::Simulated => "simulation",
            ModelAvailability::Unavailable => "none",
        }
    }

    /// Predict on one (already scaled) image. `None` when no backend exists.
    pub fn predict(&self, image: &RgbImage, texture: &TextureConfig) -> Result<Option<Prediction>> {
        match &self.availability {
            ModelAvailability::Trained(backend) => {
                let probability = backend.predict(image)?;
                let confidence = simulation::prediction_confidence(&probability);
                Ok(Some(Prediction { probability, confidence, scale: 1.0 }))
            }
            ModelAvailability::Simulated => {
                let probability = simulation::simulate_probability(image, texture);
                let confidence = simulation::simulation_confidence(&probability, image);
                Ok(Some(Prediction { probability, confidence, scale: 1.0 }))
            }
            ModelAvailability::Unavailable => Ok(None),
        }
    }
}

#[cfg(feature = "onnx")]
fn load_trained(path: &str, config: &ModelConfig) -> Result<Box<dyn SegmentationBackend>> {
    Ok(Box::new(crate::inference::OnnxSegmenter::new(path, config)?))
}

#[cfg(not(feature = "onnx"))]
fn load_trained(_path: &str, _config: &ModelConfig) -> Result<Box<dyn SegmentationBackend>> {
    anyhow::bail!("built without the `onnx` feature")
}

// ============================================================================
// ENSEMBLE / THRESHOLD / CLEANUP
// ============================================================================

/// Average the probability maps weighted by each prediction's mean confidence.
/// All predictions must share dimensions.
pub fn ensemble(predictions: &[Prediction]) -> Option<ProbabilityMap> {
    let first = predictions.first()?;
    if predictions.len() == 1 {
        return Some(first.probability.clone());
    }
    let (w, h) = first.probability.dimensions();
    let mut sum = vec![0.0f64; (w * h) as usize];
    let mut weight_sum = 0.0;
    for p in predictions {
        let weight = p.mean_confidence();
        for (s, v) in sum.iter_mut().zip(p.probability.as_raw()) {
            *s += *v as f64 * weight;
        }
        weight_sum += weight;
    }
    let norm = if weight_sum > 0.0 { weight_sum } else { 1.0 };
    Some(ProbabilityMap::from_fn(w, h, |x, y| {
        Luma([(sum[(y * w + x) as usize] / norm) as f32])
    }))
}

/// Distribution-aware cutoff:
/// p75 > 0.3 → max(0.4, p50); p50 > 0.2 → max(0.3, p50); else max(0.2, p75);
/// never above 0.6.
pub fn adaptive_threshold(probability: &ProbabilityMap) -> f32 {
    let values = probability.as_raw();
    let p50 = imaging::percentile(values, 50.0);
    let p75 = imaging::percentile(values, 75.0);
    let threshold = if p75 > 0.3 {
        p50.max(0.4)
    } else if p50 > 0.2 {
        p50.max(0.3)
    } else {
        p75.max(0.2)
    };
    threshold.min(0.6)
}

const MIN_AREA_STANDARD: u64 = 100;
const MIN_AREA_PRECISION: u64 = 200;
const HIGH_CONFIDENCE: f32 = 0.8;
const MEDIUM_CONFIDENCE: f32 = 0.6;
const MIN_RETAINED_SHARE: f64 = 0.3;

/// Threshold and clean a probability map. Returns the mask and the cutoff.
pub fn postprocess(probability: &ProbabilityMap, precision: bool) -> (Mask, f32) {
    let threshold = adaptive_threshold(probability);
    debug!("🎯 Model threshold: {:.3}", threshold);

    let raw = Mask::from_probability(probability, threshold);
    let opened = imaging::open(&imaging::open(&raw, 3), 3);
    let closed = imaging::close(&opened, 5);
    let min_area = if precision { MIN_AREA_PRECISION } else { MIN_AREA_STANDARD };
    let mut mask = imaging::remove_small_components(&closed, min_area);

    if precision {
        mask = validate_by_confidence(&mask, probability);
    }
    (imaging::close(&mask, 3), threshold)
}

/// Keep only high-probability pixels unless that discards more than 70% of
/// the mask, in which case a medium cutoff is used instead.
fn validate_by_confidence(mask: &Mask, probability: &ProbabilityMap) -> Mask {
    let high = mask.intersection(&Mask::from_probability(probability, HIGH_CONFIDENCE));
    if (high.count() as f64) >= mask.count() as f64 * MIN_RETAINED_SHARE {
        return high;
    }
    mask.intersection(&Mask::from_probability(probability, MEDIUM_CONFIDENCE))
}

// ============================================================================
// CONFIDENCE
// ============================================================================

/// Mean of 2·|p − 0.5|.
pub fn prediction_certainty(probability: &ProbabilityMap) -> f64 {
    imaging::mean_std(probability.as_raw().iter().map(|&p| 2.0 * (p as f64 - 0.5).abs())).0
}

/// Agreement between model, color and texture coverages (percent).
pub fn consensus_score(model: f64, color: f64, texture: f64) -> f64 {
    let max_diff = (model - color).abs().max((model - texture).abs()).max((color - texture).abs());
    let mut score = 1.0 / (1.0 + max_diff / 20.0);
    if max_diff < 10.0 {
        score *= 1.5;
    }
    score.clamp(0.1, 1.0)
}

/// `clamp((0.6·certainty + 0.4·consensus) · boost, 0.05, 0.95)`.
pub fn model_confidence(certainty: f64, consensus: f64, confidence_boost: f64) -> f64 {
    ((certainty * 0.6 + consensus * 0.4) * confidence_boost).clamp(0.05, 0.95)
}
