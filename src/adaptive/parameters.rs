// src/adaptive/parameters.rs
//
// Adaptive parameters nudged by labelled examples. Every update ends with
// `clamp_all`, so values never leave their ranges.

use super::features::FeatureVector;
use serde::Serialize;
use tracing::debug;

pub const CONFIDENCE_BOOST_RANGE: (f64, f64) = (0.5, 3.0);
pub const VEGETATION_THRESHOLD_RANGE: (f64, f64) = (0.2, 0.7);
pub const COLOR_SENSITIVITY_RANGE: (f64, f64) = (0.5, 2.0);
pub const TEXTURE_WEIGHT_RANGE: (f64, f64) = (0.5, 2.0);
pub const SPATIAL_CONSISTENCY_RANGE: (f64, f64) = (0.5, 2.0);
pub const FALSE_POSITIVE_PENALTY_RANGE: (f64, f64) = (0.0, 1.0);
pub const LEARNING_RATE_RANGE: (f64, f64) = (0.001, 0.5);

/// Normalized hue band treated as green.
const GREEN_HUE: (f64, f64) = (0.2, 0.6);
const HUE_SPLIT: f64 = 0.4;
const THRESHOLD_STEP: f64 = 0.05;

const HIGH_COLOR_VARIATION: f64 = 20.0;
const LOW_COLOR_VARIATION: f64 = 10.0;
const HIGH_TEXTURE_VARIANCE: f64 = 100.0;
const LOW_TEXTURE_VARIANCE: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveParameters {
    pub confidence_boost: f64,
    pub vegetation_threshold: f64,
    pub color_sensitivity: f64,
    pub texture_weight: f64,
    pub spatial_consistency: f64,
    pub false_positive_penalty: f64,
    pub learning_rate: f64,
}

impl Default for AdaptiveParameters {
    fn default() -> Self {
        Self {
            confidence_boost: 1.0,
            vegetation_threshold: 0.4,
            color_sensitivity: 1.0,
            texture_weight: 1.0,
            spatial_consistency: 1.0,
            false_positive_penalty: 0.1,
            learning_rate: 0.05,
        }
    }
}

#[inline]
fn clamp(v: f64, range: (f64, f64)) -> f64 {
    if v.is_nan() {
        return range.0;
    }
    v.clamp(range.0, range.1)
}

impl AdaptiveParameters {
    pub fn with_learning_rate(learning_rate: f64) -> Self {
        let mut p = Self {
            learning_rate,
            ..Self::default()
        };
        p.clamp_all();
        p
    }

    /// Apply one labelled example.
    pub fn update(&mut self, features: &FeatureVector, is_positive: bool) {
        let lr = self.learning_rate;

        if is_positive {
            let hue = features.normalized_hue();
            if hue > GREEN_HUE.0 && hue < GREEN_HUE.1 {
                let step = if hue < HUE_SPLIT { -THRESHOLD_STEP } else { THRESHOLD_STEP };
                self.vegetation_threshold += lr * step;
            }
        }

        let variation = features.color_variation();
        if is_positive && variation > HIGH_COLOR_VARIATION {
            self.color_sensitivity *= 1.0 + lr;
        } else if !is_positive && variation < LOW_COLOR_VARIATION {
            self.color_sensitivity *= 1.0 - lr;
        }

        let texture = features.texture_variance;
        if is_positive && texture > HIGH_TEXTURE_VARIANCE {
            self.texture_weight *= 1.0 + lr;
        } else if !is_positive && texture < LOW_TEXTURE_VARIANCE {
            self.texture_weight *= 1.0 - lr;
        }

        if is_positive {
            self.confidence_boost *= 1.0 + lr * 0.5;
        } else {
            self.confidence_boost *= 1.0 - lr * 0.2;
        }

        self.clamp_all();
        debug!(
            "🎛️ Params: boost={:.3} veg_thr={:.3} color={:.3} texture={:.3}",
            self.confidence_boost, self.vegetation_threshold, self.color_sensitivity, self.texture_weight
        );
    }

    pub fn clamp_all(&mut self) {
        self.confidence_boost = clamp(self.confidence_boost, CONFIDENCE_BOOST_RANGE);
        self.vegetation_threshold = clamp(self.vegetation_threshold, VEGETATION_THRESHOLD_RANGE);
        self.color_sensitivity = clamp(self.color_sensitivity, COLOR_SENSITIVITY_RANGE);
        self.texture_weight = clamp(self.texture_weight, TEXTURE_WEIGHT_RANGE);
        self.spatial_consistency = clamp(self.spatial_consistency, SPATIAL_CONSISTENCY_RANGE);
        self.false_positive_penalty = clamp(self.false_positive_penalty, FALSE_POSITIVE_PENALTY_RANGE);
        self.learning_rate = clamp(self.learning_rate, LEARNING_RATE_RANGE);
    }

    pub fn in_range(&self) -> bool {
        let within = |v: f64, r: (f64, f64)| v >= r.0 && v <= r.1;
        within(self.confidence_boost, CONFIDENCE_BOOST_RANGE)
            && within(self.vegetation_threshold, VEGETATION_THRESHOLD_RANGE)
            && within(self.color_sensitivity, COLOR_SENSITIVITY_RANGE)
            && within(self.texture_weight, TEXTURE_WEIGHT_RANGE)
            && within(self.spatial_consistency, SPATIAL_CONSISTENCY_RANGE)
            && within(self.false_positive_penalty, FALSE_POSITIVE_PENALTY_RANGE)
            && within(self.learning_rate, LEARNING_RATE_RANGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(hue: f64, color_std: f64, texture_variance: f64) -> FeatureVector {
        FeatureVector {
            mean_rgb: [0.0; 3],
            std_rgb: [0.0; 3],
            mean_hsv: [hue, 100.0, 100.0],
            std_hsv: [color_std; 3],
            texture_variance,
            texture_mean: 100.0,
            shape: None,
        }
    }

    #[test]
    fn test_positive_green_example() {
        let mut p = AdaptiveParameters::default();
        p.update(&features(60.0, 30.0, 200.0), true);
        assert!((p.vegetation_threshold - (0.4 - 0.05 * 0.05)).abs() < 1e-12);
        assert!((p.color_sensitivity - 1.05).abs() < 1e-12);
        assert!((p.texture_weight - 1.05).abs() < 1e-12);
        assert!((p.confidence_boost - 1.025).abs() < 1e-12);
    }

    #[test]
    fn test_negative_flat_example() {
        let mut p = AdaptiveParameters::default();
        p.update(&features(60.0, 5.0, 10.0), false);
        assert_eq!(p.vegetation_threshold, 0.4);
        assert!((p.color_sensitivity - 0.95).abs() < 1e-12);
        assert!((p.texture_weight - 0.95).abs() < 1e-12);
        assert!((p.confidence_boost - 0.99).abs() < 1e-12);
    }

    #[test]
    fn test_clamped_after_many_updates() {
        let mut p = AdaptiveParameters::with_learning_rate(0.5);
        for _ in 0..500 {
            p.update(&features(80.0, 40.0, 500.0), true);
        }
        assert!(p.in_range());
        assert_eq!(p.confidence_boost, 3.0);
        assert_eq!(p.color_sensitivity, 2.0);
    }

    #[test]
    fn test_learning_rate_clamped() {
        assert_eq!(AdaptiveParameters::with_learning_rate(5.0).learning_rate, 0.5);
    }
}
