// src/detection/auxiliary.rs
//
// Precision-only auxiliary classifiers:
//   - gradient pattern: moderate edge strength with rapidly changing magnitude
//   - statistical pattern: green local mean hue with varying saturation

use super::texture::gradient_magnitude;
use crate::color_analysis::HsvImage;
use crate::imaging::{self, FloatImage};
use crate::mask::Mask;
use crate::preprocessing::WorkingImage;
use crate::types::{
    GradientDiagnostics, MethodDiagnostics, MethodKind, MethodStats, StatisticalDiagnostics,
};
use anyhow::{ensure, Result};
use image::Luma;
use tracing::debug;

const MAGNITUDE_MIN: f32 = 20.0;
const MAGNITUDE_MAX: f32 = 100.0;
const MAGNITUDE_CURVATURE: f32 = 0.1;
const GRADIENT_CONFIDENCE_DIVISOR: f64 = 50.0;

const STAT_WINDOW: u32 = 15;
const HUE_MIN: f32 = 35.0;
const HUE_MAX: f32 = 85.0;
const SATURATION_VARIANCE_MIN: f32 = 200.0;
const STAT_CLOSE_KERNEL: u32 = 7;
const STATISTICAL_CONFIDENCE_DIVISOR: f64 = 40.0;

fn stats_for(mask: &Mask, method: MethodKind, divisor: f64, diagnostics: MethodDiagnostics) -> MethodStats {
    let coverage = mask.coverage_percentage();
    MethodStats {
        method,
        coverage_percentage: coverage,
        confidence_score: (coverage / divisor).clamp(0.0, 1.0),
        grass_pixels: mask.count(),
        total_pixels: mask.total_pixels(),
        num_components: imaging::components(mask).len(),
        diagnostics,
    }
}

/// Pixels with magnitude in (20, 100) whose normalized magnitude has a
/// Laplacian above 0.1 in absolute value.
pub fn detect_gradient_patterns(input: &WorkingImage<'_>) -> Result<(Mask, MethodStats)> {
    ensure!(input.width() > 0 && input.height() > 0, "empty image");
    let gray = imaging::to_gray(&input.image);
    let magnitude = gradient_magnitude(&gray);
    let normalized = FloatImage::from_fn(magnitude.width(), magnitude.height(), |x, y| {
        Luma([magnitude.get_pixel(x, y)[0] / 255.0])
    });
    let curvature = imaging::laplacian(&normalized);

    let mask = Mask::from_fn(gray.width(), gray.height(), |x, y| {
        let m = magnitude.get_pixel(x, y)[0];
        m > MAGNITUDE_MIN && m < MAGNITUDE_MAX && curvature.get_pixel(x, y)[0].abs() > MAGNITUDE_CURVATURE
    });

    let (mean_magnitude, _) = imaging::mean_std(magnitude.as_raw().iter().map(|&v| v as f64));
    let stats = stats_for(
        &mask,
        MethodKind::Gradient,
        GRADIENT_CONFIDENCE_DIVISOR,
        MethodDiagnostics::Gradient(GradientDiagnostics { mean_magnitude }),
    );
    debug!(
        "📈 Gradient patterns: coverage={:.2}% conf={:.3}",
        stats.coverage_percentage, stats.confidence_score
    );
    Ok((mask, stats))
}

/// 15×15 local mean hue inside the green range and local saturation
/// variance above 200, closed with a 7×7 element.
pub fn detect_statistical_patterns(input: &WorkingImage<'_>) -> Result<(Mask, MethodStats)> {
    ensure!(input.width() > 0 && input.height() > 0, "empty image");
    let hsv = HsvImage::from_rgb(&input.image);
    let hue = imaging::to_float(&hsv.channel(0));
    let saturation = imaging::to_float(&hsv.channel(1));

    let hue_mean = imaging::box_mean(&hue, STAT_WINDOW);
    let sat_var = imaging::box_variance(&saturation, STAT_WINDOW);

    let raw = Mask::from_fn(hsv.width(), hsv.height(), |x, y| {
        let h = hue_mean.get_pixel(x, y)[0];
        h > HUE_MIN && h < HUE_MAX && sat_var.get_pixel(x, y)[0] > SATURATION_VARIANCE_MIN
    });
    let mask = imaging::close(&raw, STAT_CLOSE_KERNEL);

    let (mean_hue, _) = imaging::mean_std(hue_mean.as_raw().iter().map(|&v| v as f64));
    let (mean_saturation_variance, _) = imaging::mean_std(sat_var.as_raw().iter().map(|&v| v as f64));
    let stats = stats_for(
        &mask,
        MethodKind::Statistical,
        STATISTICAL_CONFIDENCE_DIVISOR,
        MethodDiagnostics::Statistical(StatisticalDiagnostics {
            mean_hue,
            mean_saturation_variance,
        }),
    );
    debug!(
        "📊 Statistical patterns: coverage={:.2}% conf={:.3}",
        stats.coverage_percentage, stats.confidence_score
    );
    Ok((mask, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_flat_image_has_no_patterns() {
        let img = RgbImage::from_pixel(40, 40, Rgb([90, 140, 60]));
        let (g, gs) = detect_gradient_patterns(&WorkingImage::borrowed(&img)).unwrap();
        assert!(g.is_empty());
        assert_eq!(gs.confidence_score, 0.0);
        let (s, _) = detect_statistical_patterns(&WorkingImage::borrowed(&img)).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn test_statistical_detects_varied_green() {
        // Alternating saturation stripes of a green hue.
        let img = RgbImage::from_fn(60, 60, |x, _| {
            if x % 2 == 0 { Rgb([20, 200, 20]) } else { Rgb([150, 200, 150]) }
        });
        let (mask, stats) = detect_statistical_patterns(&WorkingImage::borrowed(&img)).unwrap();
        assert!(stats.coverage_percentage > 50.0);
        assert!(mask.get(30, 30));
        assert!(stats.confidence_score <= 1.0);
    }
}
