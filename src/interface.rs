// src/interface.rs
//
// Collaborators the detector consumes but does not own: where frames come
// from and how results are drawn.

use crate::mask::Mask;
use crate::types::DetectionStats;
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::PathBuf;

/// Yields images on demand. `Ok(None)` means the source is exhausted.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Turns a detection into an annotated image.
pub trait OverlayRenderer {
    fn render(&mut self, image: &RgbImage, mask: &Mask, stats: &DetectionStats) -> Result<RgbImage>;
}

/// Reads a fixed list of image files in order.
pub struct ImageSequence {
    paths: std::vec::IntoIter<PathBuf>,
}

impl ImageSequence {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into_iter(),
        }
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.next() else {
            return Ok(None);
        };
        let image = image::open(&path)
            .with_context(|| format!("Failed to decode {}", path.display()))?
            .to_rgb8();
        Ok(Some(image))
    }
}

/// Tints detected pixels toward a solid color.
pub struct MaskTint {
    pub color: Rgb<u8>,
    /// Share of the tint color in [0, 1].
    pub alpha: f32,
}

impl Default for MaskTint {
    fn default() -> Self {
        Self {
            color: Rgb([0, 255, 0]),
            alpha: 0.4,
        }
    }
}

impl OverlayRenderer for MaskTint {
    fn render(&mut self, image: &RgbImage, mask: &Mask, _stats: &DetectionStats) -> Result<RgbImage> {
        anyhow::ensure!(
            image.dimensions() == mask.dimensions(),
            "mask {:?} does not match image {:?}",
            mask.dimensions(),
            image.dimensions()
        );
        let a = self.alpha.clamp(0.0, 1.0);
        let mut out = image.clone();
        for (x, y, p) in out.enumerate_pixels_mut() {
            if mask.get(x, y) {
                for c in 0..3 {
                    p[c] = (p[c] as f32 * (1.0 - a) + self.color[c] as f32 * a).round() as u8;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DetectionMethod, Mode, ScenarioFlags};

    fn stats() -> DetectionStats {
        DetectionStats {
            method: DetectionMethod::Color,
            mode: Mode::Standard,
            coverage_percentage: 50.0,
            confidence_score: 0.5,
            grass_pixels: 2,
            total_pixels: 4,
            scenario_flags: ScenarioFlags::default(),
            component_stats: Vec::new(),
            fusion_weights: Vec::new(),
            spatial_analysis: None,
            methods_agreement: None,
            fallback_from: None,
            processing_ms: 0.0,
        }
    }

    #[test]
    fn test_tint_only_touches_masked_pixels() {
        let image = RgbImage::from_pixel(2, 2, Rgb([100, 100, 100]));
        let mask = Mask::from_fn(2, 2, |x, _| x == 0);
        let out = MaskTint::default().render(&image, &mask, &stats()).unwrap();
        assert_eq!(out.get_pixel(1, 0), &Rgb([100, 100, 100]));
        assert_eq!(out.get_pixel(0, 0), &Rgb([60, 162, 60]));
    }

    #[test]
    fn test_tint_rejects_size_mismatch() {
        let image = RgbImage::new(3, 3);
        let mask = Mask::empty(2, 2);
        assert!(MaskTint::default().render(&image, &mask, &stats()).is_err());
    }

    #[test]
    fn test_sequence_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        RgbImage::from_pixel(4, 3, Rgb([1, 2, 3])).save(&path).unwrap();
        let mut source = ImageSequence::new(vec![path]);
        assert_eq!(source.next_frame().unwrap().unwrap().dimensions(), (4, 3));
        assert!(source.next_frame().unwrap().is_none());
    }
}
