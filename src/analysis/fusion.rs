// src/analysis/fusion.rs
//
// Weight combiner: per-method confidence → normalized fusion weights →
// weighted vote over the method masks.
//
//   weight_i = confidence_i × (1 + coverage_i / 200)      (≤ 50% coverage boost)
//   score    = Σ mask_i(0|255) × weight_i / Σ weight
//   mask     = score > cutoff
//
// The cutoff is the frame's own 70th percentile in precision mode and a
// fixed mid-range value otherwise.

use crate::imaging::{self, FloatImage};
use crate::mask::Mask;
use crate::types::{FusionConfig, MethodKind, MethodStats};
use tracing::debug;

const COVERAGE_BOOST_DIVISOR: f64 = 200.0;

#[derive(Debug, Clone)]
pub struct FusionResult {
    pub mask: Mask,
    pub weights: Vec<(MethodKind, f64)>,
    pub threshold: f32,
}

/// Normalized fusion weights, in input order. Uniform when every raw
/// weight is zero.
pub fn fusion_weights(stats: &[MethodStats]) -> Vec<f64> {
    if stats.is_empty() {
        return Vec::new();
    }
    let raw: Vec<f64> = stats
        .iter()
        .map(|s| {
            let conf = s.confidence_score.clamp(0.0, 1.0);
            let cov = s.coverage_percentage.clamp(0.0, 100.0);
            conf * (1.0 + cov / COVERAGE_BOOST_DIVISOR)
        })
        .collect();
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        raw.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / stats.len() as f64; stats.len()]
    }
}

/// Weighted score in [0, 255]. Masks are resized (nearest) to the first
/// mask's shape.
pub fn weighted_score(masks: &[&Mask], weights: &[f64]) -> Option<FloatImage> {
    let first = masks.first()?;
    let (w, h) = first.dimensions();
    let mut score = FloatImage::new(w, h);
    for (mask, &weight) in masks.iter().zip(weights) {
        let resized;
        let m = if mask.dimensions() == (w, h) {
            *mask
        } else {
            resized = mask.resize_nearest(w, h);
            &resized
        };
        for (s, &v) in score.iter_mut().zip(m.as_image().as_raw()) {
            *s += v as f32 * weight as f32;
        }
    }
    Some(score)
}

/// # Arguments
/// * `results` - (mask, stats) per surviving method
/// * `precision` - Use the per-frame percentile cutoff
pub fn fuse(results: &[(Mask, MethodStats)], precision: bool, config: &FusionConfig) -> Option<FusionResult> {
    let stats: Vec<MethodStats> = results.iter().map(|(_, s)| s.clone()).collect();
    let weights = fusion_weights(&stats);
    let masks: Vec<&Mask> = results.iter().map(|(m, _)| m).collect();
    let score = weighted_score(&masks, &weights)?;

    let fixed = config.standard_threshold as f32;
    let threshold = if precision {
        let p = imaging::percentile(score.as_raw(), config.precision_percentile);
        let max = score.as_raw().iter().copied().fold(0.0f32, f32::max);
        // A cutoff at the maximum would select nothing.
        if p >= max {
            fixed
        } else {
            p
        }
    } else {
        fixed
    };

    let mask = Mask::from_fn(score.width(), score.height(), |x, y| {
        score.get_pixel(x, y)[0] > threshold
    });

    let weights: Vec<(MethodKind, f64)> = stats.iter().map(|s| s.method).zip(weights).collect();
    debug!(
        "🔀 Fused {} methods: threshold={:.1} coverage={:.2}% weights=[{}]",
        results.len(),
        threshold,
        mask.coverage_percentage(),
        weights
            .iter()
            .map(|(k, w)| format!("{}={:.3}", k.as_str(), w))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Some(FusionResult { mask, weights, threshold })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColorDiagnostics, MethodDiagnostics};

    fn stats(method: MethodKind, coverage: f64, confidence: f64) -> MethodStats {
        MethodStats {
            method,
            coverage_percentage: coverage,
            confidence_score: confidence,
            grass_pixels: 0,
            total_pixels: 0,
            num_components: 0,
            diagnostics: MethodDiagnostics::Color(ColorDiagnostics::default()),
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let w = fusion_weights(&[
            stats(MethodKind::Color, 40.0, 0.8),
            stats(MethodKind::Texture, 10.0, 0.4),
            stats(MethodKind::Gradient, 0.0, 0.1),
        ]);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w[0] > w[1] && w[1] > w[2]);
    }

    #[test]
    fn test_zero_coverage_weight_bounded() {
        let w = fusion_weights(&[
            stats(MethodKind::Color, 0.0, 0.5),
            stats(MethodKind::Texture, 30.0, 0.5),
        ]);
        assert!(w[0] <= 0.5);
    }

    #[test]
    fn test_all_zero_is_uniform() {
        let w = fusion_weights(&[stats(MethodKind::Color, 0.0, 0.0), stats(MethodKind::Texture, 0.0, 0.0)]);
        assert_eq!(w, vec![0.5, 0.5]);
    }

    #[test]
    fn test_standard_fusion_majority() {
        let a = Mask::from_fn(10, 10, |x, _| x < 5);
        let b = Mask::from_fn(10, 10, |x, _| x < 5);
        let c = Mask::empty(10, 10);
        let results = vec![
            (a, stats(MethodKind::Color, 50.0, 0.6)),
            (b, stats(MethodKind::Texture, 50.0, 0.6)),
            (c, stats(MethodKind::Gradient, 0.0, 0.2)),
        ];
        let fused = fuse(&results, false, &FusionConfig::default()).unwrap();
        assert!(fused.mask.get(2, 2));
        assert!(!fused.mask.get(7, 2));
        assert_eq!(fused.weights.len(), 3);
    }

    #[test]
    fn test_resizes_to_first_shape() {
        let a = Mask::from_fn(10, 10, |_, _| true);
        let b = Mask::from_fn(20, 20, |_, _| true);
        let results = vec![(a, stats(MethodKind::Color, 100.0, 1.0)), (b, stats(MethodKind::Texture, 100.0, 1.0))];
        let fused = fuse(&results, false, &FusionConfig::default()).unwrap();
        assert_eq!(fused.mask.dimensions(), (10, 10));
        assert!(fused.mask.get(9, 9));
    }

    #[test]
    fn test_precision_agreement_not_emptied() {
        let a = Mask::from_fn(10, 10, |x, _| x < 6);
        let results = vec![(a.clone(), stats(MethodKind::Color, 60.0, 0.7)), (a, stats(MethodKind::Texture, 60.0, 0.7))];
        let fused = fuse(&results, true, &FusionConfig::default()).unwrap();
        assert_eq!(fused.mask.count(), 60);
    }

    #[test]
    fn test_empty_input() {
        assert!(fuse(&[], false, &FusionConfig::default()).is_none());
    }
}
