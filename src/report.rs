// src/report.rs
//
// Per-image JSON report written by the batch binary.

use crate::analysis::DensityAnalysis;
use crate::color_analysis::DominantColor;
use crate::detector::{Detection, GrassDetector};
use crate::mask::Mask;
use crate::types::DetectionStats;
use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::fs;
use std::io::Cursor;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub generated_at: DateTime<Utc>,
    pub stats: DetectionStats,
    pub scenario_flags: Vec<&'static str>,
    pub density: DensityAnalysis,
    pub dominant_colors: Vec<DominantColor>,
    pub detection_confidence: f64,
    /// PNG of the mask, base64 encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_png_base64: Option<String>,
}

impl DetectionReport {
    /// # Arguments
    /// * `name` - Label stored in the report (usually the file path)
    /// * `image` - The image the detection ran on
    /// * `detection` - Detector output
    /// * `embed_mask` - Include the base64 PNG mask
    pub fn build(
        detector: &GrassDetector,
        name: &str,
        image: &RgbImage,
        detection: &Detection,
        embed_mask: bool,
    ) -> Result<Self> {
        let mask_png_base64 = if embed_mask {
            Some(base64::engine::general_purpose::STANDARD.encode(encode_mask_png(&detection.mask)?))
        } else {
            None
        };
        Ok(Self {
            image: name.to_string(),
            width: image.width(),
            height: image.height(),
            generated_at: Utc::now(),
            scenario_flags: detection.stats.scenario_flags.active(),
            density: detector.analyze_density(&detection.mask),
            dominant_colors: detector.dominant_colors(image, &detection.mask),
            detection_confidence: detector.detection_confidence(&detection.stats),
            stats: detection.stats.clone(),
            mask_png_base64,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

pub fn encode_mask_png(mask: &Mask) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    mask.as_image()
        .write_to(&mut buf, ImageFormat::Png)
        .context("Failed to encode mask PNG")?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Config, DetectionMethod};
    use image::Rgb;

    #[test]
    fn test_report_round_trips_mask() {
        let detector = GrassDetector::new(Config::default()).unwrap();
        let image = RgbImage::from_fn(80, 60, |x, _| {
            if x < 40 {
                Rgb([34, 139, 34])
            } else {
                Rgb([128, 128, 128])
            }
        });
        let detection = detector.detect(&image, DetectionMethod::Color, None).unwrap();
        let report = DetectionReport::build(&detector, "field.png", &image, &detection, true).unwrap();

        let b64 = report.mask_png_base64.as_ref().unwrap();
        let png = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(&decoded, detection.mask.as_image());

        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["image"], "field.png");
        assert_eq!(json["stats"]["method"], "color");
        assert!(json["density"]["classification"].is_string());
    }

    #[test]
    fn test_mask_omitted_when_not_embedded() {
        let detector = GrassDetector::new(Config::default()).unwrap();
        let image = RgbImage::from_pixel(20, 20, Rgb([128, 128, 128]));
        let detection = detector.detect(&image, DetectionMethod::Color, None).unwrap();
        let report = DetectionReport::build(&detector, "gray.png", &image, &detection, false).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("mask_png_base64").is_none());
        assert!(report.dominant_colors.is_empty());
    }
}
