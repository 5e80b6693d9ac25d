// src/analysis/spatial.rs
//
// Region-level summaries of a final mask and of the method bank:
// spatial distribution, inter-method agreement, density classification and
// the coverage-based detection confidence.

use crate::imaging;
use crate::mask::Mask;
use crate::types::{DetectionMethod, DetectionStats, MethodKind, MethodStats, MethodsAgreement, SpatialAnalysis};
use serde::Serialize;

const LOW_DENSITY: f64 = 0.1;
const MEDIUM_DENSITY: f64 = 0.3;
const COMBINED_FULL_COVERAGE: f64 = 50.0;
const SINGLE_FULL_COVERAGE: f64 = 70.0;

pub fn spatial_analysis(mask: &Mask) -> SpatialAnalysis {
    let areas = imaging::components(mask).areas();
    if areas.is_empty() {
        return SpatialAnalysis::default();
    }
    let total: u64 = areas.iter().sum();
    let largest = areas.iter().copied().max().unwrap_or(0);
    SpatialAnalysis {
        num_regions: areas.len(),
        avg_region_size: total as f64 / areas.len() as f64,
        largest_region_ratio: if total > 0 { largest as f64 / total as f64 } else { 0.0 },
        fragmentation_index: areas.len() as f64 / (total as f64 + 1e-6),
    }
}

pub fn methods_agreement(stats: &[MethodStats]) -> MethodsAgreement {
    if stats.is_empty() {
        return MethodsAgreement::default();
    }
    let (_, coverage_std) = imaging::mean_std(stats.iter().map(|s| s.coverage_percentage));
    let (mean_confidence, _) = imaging::mean_std(stats.iter().map(|s| s.confidence_score));
    MethodsAgreement {
        coverage_std,
        mean_confidence,
        methods_count: stats.len(),
        consistency_score: 1.0 / (1.0 + coverage_std),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityClass {
    None,
    Low,
    Medium,
    High,
}

impl DensityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DensityClass::None => "none",
            DensityClass::Low => "low",
            DensityClass::Medium => "medium",
            DensityClass::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityAnalysis {
    pub num_regions: usize,
    pub largest_area: u64,
    pub average_area: f64,
    pub total_area: u64,
    pub coverage_ratio: f64,
    pub area_std: f64,
    pub classification: DensityClass,
}

pub fn analyze_density(mask: &Mask) -> DensityAnalysis {
    let areas = imaging::components(mask).areas();
    if areas.is_empty() {
        return DensityAnalysis {
            num_regions: 0,
            largest_area: 0,
            average_area: 0.0,
            total_area: 0,
            coverage_ratio: 0.0,
            area_std: 0.0,
            classification: DensityClass::None,
        };
    }
    let total_area: u64 = areas.iter().sum();
    let coverage_ratio = total_area as f64 / mask.total_pixels().max(1) as f64;
    let (average_area, area_std) = imaging::mean_std(areas.iter().map(|&a| a as f64));
    let classification = if coverage_ratio < LOW_DENSITY {
        DensityClass::Low
    } else if coverage_ratio < MEDIUM_DENSITY {
        DensityClass::Medium
    } else {
        DensityClass::High
    };
    DensityAnalysis {
        num_regions: areas.len(),
        largest_area: areas.iter().copied().max().unwrap_or(0),
        average_area,
        total_area,
        coverage_ratio,
        area_std,
        classification,
    }
}

/// Coverage-driven summary confidence: full at 50% coverage for the combined
/// method and 70% for single methods, scaled by color/texture agreement when
/// both ran.
pub fn detection_confidence(stats: &DetectionStats) -> f64 {
    let divisor = if stats.method == DetectionMethod::Combined {
        COMBINED_FULL_COVERAGE
    } else {
        SINGLE_FULL_COVERAGE
    };
    let mut confidence = (stats.coverage_percentage / divisor).min(1.0);

    let coverage_of = |kind: MethodKind| {
        stats
            .component_stats
            .iter()
            .find(|s| s.method == kind)
            .map(|s| s.coverage_percentage)
    };
    if let (Some(color), Some(texture)) = (coverage_of(MethodKind::Color), coverage_of(MethodKind::Texture)) {
        let agreement = 1.0 - (color - texture).abs() / 100.0;
        confidence *= 0.8 + 0.2 * agreement;
    }
    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColorDiagnostics, MethodDiagnostics, Mode, ScenarioFlags};

    fn method(kind: MethodKind, coverage: f64, confidence: f64) -> MethodStats {
        MethodStats {
            method: kind,
            coverage_percentage: coverage,
            confidence_score: confidence,
            grass_pixels: 0,
            total_pixels: 0,
            num_components: 0,
            diagnostics: MethodDiagnostics::Color(ColorDiagnostics::default()),
        }
    }

    #[test]
    fn test_spatial_two_regions() {
        let mask = Mask::from_fn(20, 10, |x, _| x < 3 || (x >= 10 && x < 19));
        let s = spatial_analysis(&mask);
        assert_eq!(s.num_regions, 2);
        assert!((s.avg_region_size - 60.0).abs() < 1e-9);
        assert!((s.largest_region_ratio - 0.75).abs() < 1e-9);
        assert_eq!(spatial_analysis(&Mask::empty(5, 5)), SpatialAnalysis::default());
    }

    #[test]
    fn test_methods_agreement() {
        let a = methods_agreement(&[method(MethodKind::Color, 10.0, 0.4), method(MethodKind::Texture, 30.0, 0.8)]);
        assert_eq!(a.methods_count, 2);
        assert!((a.coverage_std - 10.0).abs() < 1e-9);
        assert!((a.mean_confidence - 0.6).abs() < 1e-9);
        assert!((a.consistency_score - 1.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_density_classes() {
        assert_eq!(analyze_density(&Mask::empty(10, 10)).classification, DensityClass::None);
        let low = Mask::from_fn(10, 10, |x, y| x < 1 && y < 5);
        assert_eq!(analyze_density(&low).classification, DensityClass::Low);
        let medium = Mask::from_fn(10, 10, |x, _| x < 2);
        assert_eq!(analyze_density(&medium).classification, DensityClass::Medium);
        let high = Mask::from_fn(10, 10, |x, _| x < 3);
        assert_eq!(analyze_density(&high).classification, DensityClass::High);
    }

    #[test]
    fn test_detection_confidence() {
        let mut stats = DetectionStats {
            method: DetectionMethod::Combined,
            mode: Mode::Standard,
            coverage_percentage: 25.0,
            confidence_score: 0.5,
            grass_pixels: 0,
            total_pixels: 0,
            scenario_flags: ScenarioFlags::default(),
            component_stats: vec![method(MethodKind::Color, 25.0, 0.5), method(MethodKind::Texture, 25.0, 0.5)],
            fusion_weights: Vec::new(),
            spatial_analysis: None,
            methods_agreement: None,
            fallback_from: None,
            processing_ms: 0.0,
        };
        assert!((detection_confidence(&stats) - 0.5).abs() < 1e-9);
        stats.method = DetectionMethod::Color;
        stats.component_stats.clear();
        assert!((detection_confidence(&stats) - 25.0 / 70.0).abs() < 1e-9);
    }
}
