// src/analysis/confidence.rs
//
// Trustworthiness score for any mask:
//
//   confidence = 0.4 × area-consistency + 0.3 × density + 0.3 × focus
//
// Area-consistency rewards components of similar size, density rewards
// coverage inside the plausible band [0.05, 0.8], focus rewards sharp
// captures (Laplacian variance).

use crate::imaging::{self, Components};
use crate::mask::Mask;
use image::GrayImage;

const AREA_WEIGHT: f64 = 0.4;
const DENSITY_WEIGHT: f64 = 0.3;
const FOCUS_WEIGHT: f64 = 0.3;

/// Consistency reported when the mask has no components at all.
const NO_COMPONENT_CONSISTENCY: f64 = 0.1;
const DENSITY_LOW: f64 = 0.05;
const DENSITY_HIGH: f64 = 0.8;
const FOCUS_NORMALIZER: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceBreakdown {
    pub area_consistency: f64,
    pub density: f64,
    pub focus: f64,
    pub score: f64,
}

/// 1 − (std / mean) of the component areas, clamped to [0, 1].
pub fn area_consistency(areas: &[u64]) -> f64 {
    if areas.is_empty() {
        return NO_COMPONENT_CONSISTENCY;
    }
    let (mean, std) = imaging::mean_std(areas.iter().map(|&a| a as f64));
    if mean <= 0.0 {
        return NO_COMPONENT_CONSISTENCY;
    }
    (1.0 - std / mean).clamp(0.0, 1.0)
}

pub fn density_score(fraction: f64) -> f64 {
    if fraction < DENSITY_LOW {
        (fraction / DENSITY_LOW).clamp(0.0, 1.0)
    } else if fraction > DENSITY_HIGH {
        (1.0 - (fraction - DENSITY_HIGH) / (1.0 - DENSITY_HIGH)).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

pub fn focus_score(laplacian_variance: f64) -> f64 {
    (laplacian_variance / FOCUS_NORMALIZER).clamp(0.0, 1.0)
}

/// Score a mask whose components are already labelled.
pub fn score(mask: &Mask, components: &Components, focus_variance: f64) -> ConfidenceBreakdown {
    let area_consistency = area_consistency(&components.areas());
    let density = density_score(mask.coverage_fraction());
    let focus = focus_score(focus_variance);
    let score = (AREA_WEIGHT * area_consistency + DENSITY_WEIGHT * density + FOCUS_WEIGHT * focus)
        .clamp(0.0, 1.0);
    ConfidenceBreakdown {
        area_consistency,
        density,
        focus,
        score,
    }
}

/// Score a mask against the grayscale source it was detected on.
pub fn mask_confidence(mask: &Mask, gray: &GrayImage) -> ConfidenceBreakdown {
    let components = imaging::components(mask);
    score(mask, &components, imaging::laplacian_variance(gray))
}

/// Cheap realtime estimate: `min(cap, coverage% / divisor)`.
pub fn linear_confidence(coverage_percentage: f64, divisor: f64, cap: f64) -> f64 {
    if divisor <= 0.0 {
        return 0.0;
    }
    (coverage_percentage / divisor).clamp(0.0, cap.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_area_consistency() {
        assert_eq!(area_consistency(&[]), 0.1);
        assert_eq!(area_consistency(&[100, 100, 100]), 1.0);
        let mixed = area_consistency(&[10, 1000]);
        assert!(mixed < 0.1);
    }

    #[test]
    fn test_density_band() {
        assert_eq!(density_score(0.0), 0.0);
        assert!((density_score(0.025) - 0.5).abs() < 1e-12);
        assert_eq!(density_score(0.05), 1.0);
        assert_eq!(density_score(0.8), 1.0);
        assert!((density_score(0.9) - 0.5).abs() < 1e-9);
        assert_eq!(density_score(1.0), 0.0);
    }

    #[test]
    fn test_single_block_confidence() {
        let mask = Mask::from_fn(100, 100, |x, y| x < 50 && y < 40);
        let gray = GrayImage::from_pixel(100, 100, Luma([120]));
        let c = mask_confidence(&mask, &gray);
        assert!((c.score - 0.7).abs() < 1e-9);
        assert!(c.score <= 1.0 && c.score >= 0.0);
    }

    #[test]
    fn test_empty_mask_confidence() {
        let mask = Mask::empty(50, 50);
        let gray = GrayImage::from_pixel(50, 50, Luma([120]));
        let c = mask_confidence(&mask, &gray);
        assert!((c.score - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_linear_confidence_capped() {
        assert!((linear_confidence(20.0, 50.0, 0.8) - 0.4).abs() < 1e-12);
        assert_eq!(linear_confidence(90.0, 50.0, 0.8), 0.8);
    }
}
