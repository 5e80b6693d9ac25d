// src/detection/color.rs
//
// Color classifier: thresholds the HSV representation of the image against
// calibrated vegetation bands (green, yellow-green, dark green, brown).
//
// Pipeline:
//   contrast check → CLAHE (at most once) → HSV → band calibration →
//   band union → open(3) → close(5) → close(7) → adaptive component filter

use crate::analysis::confidence;
use crate::color_analysis::{self, CalibrationContext, HsvImage, VEGETATION_BANDS};
use crate::imaging;
use crate::mask::Mask;
use crate::preprocessing::{self, WorkingImage};
use crate::types::{ColorConfig, ColorDiagnostics, MethodDiagnostics, MethodKind, MethodStats};
use anyhow::{ensure, Result};
use tracing::debug;

const SPARSE_COVERAGE: f64 = 0.05;
const DENSE_COVERAGE: f64 = 0.8;
const SPARSE_AREA_FACTOR: f64 = 0.3;
const DENSE_AREA_FACTOR: f64 = 1.5;

pub struct ColorClassifier<'a> {
    config: &'a ColorConfig,
}

impl<'a> ColorClassifier<'a> {
    pub fn new(config: &'a ColorConfig) -> Self {
        Self { config }
    }

    /// Minimum component area given the coverage before filtering.
    pub fn adaptive_min_area(&self, initial_coverage: f64) -> u32 {
        let base = self.config.min_area as f64 / 2.0;
        if !self.config.adaptive_min_area {
            return base as u32;
        }
        let factor = if initial_coverage < SPARSE_COVERAGE {
            SPARSE_AREA_FACTOR
        } else if initial_coverage > DENSE_COVERAGE {
            DENSE_AREA_FACTOR
        } else {
            1.0
        };
        (base * factor) as u32
    }

    /// # Arguments
    /// * `input` - Working image (may already be equalized)
    /// * `calibration` - Exposure context; measured from the image when `None`
    pub fn detect(
        &self,
        input: &WorkingImage<'_>,
        calibration: Option<CalibrationContext>,
    ) -> Result<(Mask, MethodStats)> {
        ensure!(input.width() > 0 && input.height() > 0, "empty image");

        let gray = imaging::to_gray(&input.image);
        let (_, gray_std) = imaging::gray_mean_std(&gray);
        let needs_equalization = gray_std / 255.0 < self.config.contrast_threshold;
        let enhanced = if needs_equalization {
            preprocessing::equalize_once(input, self.config.clahe_clip_limit, self.config.clahe_tile_grid)
        } else {
            input.clone()
        };
        let clahe_applied = needs_equalization && !input.equalized;

        let hsv = HsvImage::from_rgb(&enhanced.image);
        let ctx = calibration.unwrap_or_else(|| color_analysis::measure_calibration(&hsv));

        let mut calibration_used = false;
        let bands: Vec<_> = VEGETATION_BANDS
            .iter()
            .map(|band| {
                let (b, changed) = color_analysis::calibrate_band(
                    band,
                    &ctx,
                    self.config.brightness_threshold,
                    self.config.contrast_threshold,
                );
                calibration_used |= changed;
                b
            })
            .collect();

        let raw = hsv.in_any_band(&bands);
        let cleaned = imaging::close(&imaging::close(&imaging::open(&raw, 3), 5), 7);

        let initial_coverage = cleaned.coverage_fraction();
        let min_area = self.adaptive_min_area(initial_coverage);
        let mask = imaging::remove_small_components(&cleaned, min_area as u64);

        let components = imaging::components(&mask);
        let conf = confidence::score(&mask, &components, imaging::laplacian_variance(&gray));

        debug!(
            "🌿 Color: coverage={:.2}% conf={:.3} components={} min_area={} clahe={} calibrated={}",
            mask.coverage_percentage(),
            conf.score,
            components.len(),
            min_area,
            clahe_applied,
            calibration_used
        );

        let stats = MethodStats {
            method: MethodKind::Color,
            coverage_percentage: mask.coverage_percentage(),
            confidence_score: conf.score,
            grass_pixels: mask.count(),
            total_pixels: mask.total_pixels(),
            num_components: components.len(),
            diagnostics: MethodDiagnostics::Color(ColorDiagnostics {
                calibration_used,
                clahe_applied,
                adaptive_min_area: min_area,
                initial_coverage,
            }),
        };
        Ok((mask, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn green_rectangle() -> RgbImage {
        // 200x100 frame, 80x50 rectangle = 20%
        RgbImage::from_fn(200, 100, |x, y| {
            if (60..140).contains(&x) && (25..75).contains(&y) {
                Rgb([34, 139, 34])
            } else {
                Rgb([128, 128, 128])
            }
        })
    }

    #[test]
    fn test_adaptive_min_area() {
        let config = ColorConfig::default();
        let c = ColorClassifier::new(&config);
        assert_eq!(c.adaptive_min_area(0.01), 150);
        assert_eq!(c.adaptive_min_area(0.5), 500);
        assert_eq!(c.adaptive_min_area(0.9), 750);
    }

    #[test]
    fn test_green_rectangle_coverage() {
        let config = ColorConfig::default();
        let img = green_rectangle();
        let (mask, stats) = ColorClassifier::new(&config)
            .detect(&WorkingImage::borrowed(&img), None)
            .unwrap();
        assert_eq!(mask.dimensions(), (200, 100));
        assert!((stats.coverage_percentage - 20.0).abs() < 2.0, "{}", stats.coverage_percentage);
        assert!(stats.confidence_score > 0.5);
        assert_eq!(stats.num_components, 1);
    }

    #[test]
    fn test_gray_image_detects_nothing() {
        let config = ColorConfig::default();
        let img = RgbImage::from_pixel(80, 80, Rgb([128, 128, 128]));
        let (mask, stats) = ColorClassifier::new(&config)
            .detect(&WorkingImage::borrowed(&img), None)
            .unwrap();
        assert!(mask.is_empty());
        assert_eq!(stats.coverage_percentage, 0.0);
    }

    #[test]
    fn test_equalization_not_repeated() {
        let config = ColorConfig::default();
        let img = green_rectangle();
        let pre = WorkingImage::owned(img, true);
        let (_, stats) = ColorClassifier::new(&config).detect(&pre, None).unwrap();
        match stats.diagnostics {
            MethodDiagnostics::Color(d) => assert!(!d.clahe_applied),
            _ => panic!("wrong diagnostics"),
        }
    }
}
