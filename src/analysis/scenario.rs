// src/analysis/scenario.rs
//
// Adverse capture condition flags. Each flag is an independent test against
// the source image or the final mask; thresholds come from
// `ScenarioThresholds` so the hand-tuned cutoffs stay overridable.

use crate::imaging;
use crate::mask::Mask;
use crate::types::{ScenarioFlags, ScenarioThresholds};
use image::GrayImage;
use tracing::debug;

/// Relative coverage gap `|a − b| / max(a, b)`; 0 when both are empty.
pub fn relative_disagreement(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max <= 0.0 {
        return 0.0;
    }
    (a - b).abs() / max
}

/// # Arguments
/// * `gray` - Grayscale source image
/// * `mask` - Final mask
/// * `method_pair` - Coverages of the two primary methods, when both ran
/// * `focus_variance` - Laplacian variance if already computed
pub fn detect_scenarios(
    gray: &GrayImage,
    mask: &Mask,
    method_pair: Option<(f64, f64)>,
    focus_variance: Option<f64>,
    thresholds: &ScenarioThresholds,
) -> ScenarioFlags {
    let (mean, std) = imaging::gray_mean_std(gray);
    let brightness = mean / 255.0;
    let contrast = std / 255.0;
    let coverage = mask.coverage_fraction();
    let focus = focus_variance.unwrap_or_else(|| imaging::laplacian_variance(gray));

    let flags = ScenarioFlags {
        low_light: brightness < thresholds.low_light,
        overexposed: brightness > thresholds.overexposed,
        low_contrast: contrast < thresholds.low_contrast,
        method_disagreement: method_pair
            .map(|(a, b)| relative_disagreement(a, b) > thresholds.method_disagreement)
            .unwrap_or(false),
        sparse_detection: coverage < thresholds.sparse_coverage,
        dense_detection: coverage > thresholds.dense_coverage,
        poor_focus: focus < thresholds.poor_focus,
    };

    let active = flags.active();
    if !active.is_empty() {
        debug!(
            "⚠️ Scenario flags: {} (brightness={:.2}, contrast={:.2}, coverage={:.3}, focus={:.1})",
            active.join(", "),
            brightness,
            contrast,
            coverage,
            focus
        );
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gray(value: u8) -> GrayImage {
        GrayImage::from_pixel(100, 100, Luma([value]))
    }

    #[test]
    fn test_sparse_dense_boundaries() {
        let t = ScenarioThresholds::default();
        let at_sparse = Mask::from_fn(100, 100, |x, y| y * 100 + x < 500);
        let flags = detect_scenarios(&gray(128), &at_sparse, None, None, &t);
        assert!(!flags.sparse_detection);
        assert!(!flags.dense_detection);

        let below_sparse = Mask::from_fn(100, 100, |x, y| y * 100 + x < 499);
        assert!(detect_scenarios(&gray(128), &below_sparse, None, None, &t).sparse_detection);

        let at_dense = Mask::from_fn(100, 100, |x, y| y * 100 + x < 8000);
        let flags = detect_scenarios(&gray(128), &at_dense, None, None, &t);
        assert!(!flags.dense_detection);
        assert!(!flags.sparse_detection);

        let above_dense = Mask::from_fn(100, 100, |x, y| y * 100 + x < 8001);
        assert!(detect_scenarios(&gray(128), &above_dense, None, None, &t).dense_detection);
    }

    #[test]
    fn test_lighting_flags() {
        let t = ScenarioThresholds::default();
        let mask = Mask::empty(100, 100);
        let dark = detect_scenarios(&gray(20), &mask, None, None, &t);
        assert!(dark.low_light && !dark.overexposed);
        let bright = detect_scenarios(&gray(250), &mask, None, None, &t);
        assert!(bright.overexposed && !bright.low_light);
        assert!(bright.low_contrast && bright.poor_focus);
    }

    #[test]
    fn test_method_disagreement() {
        let t = ScenarioThresholds::default();
        let mask = Mask::empty(100, 100);
        assert!(detect_scenarios(&gray(128), &mask, Some((40.0, 10.0)), None, &t).method_disagreement);
        assert!(!detect_scenarios(&gray(128), &mask, Some((40.0, 30.0)), None, &t).method_disagreement);
        assert!(!detect_scenarios(&gray(128), &mask, Some((0.0, 0.0)), None, &t).method_disagreement);
    }
}
