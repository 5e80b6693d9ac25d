// src/color_analysis.rs
//
// HSV and Lab color handling for vegetation classification.
//
// HSV values follow the 8-bit convention used by the band tables:
//   - H: 0-179 (degrees / 2)
//   - S: 0-255
//   - V: 0-255
//
// Band tables cover the natural tones of tall grass:
//   - natural green (healthy blades)
//   - yellow-green (dry tips, young growth)
//   - dark green (dense or shaded growth)
//   - brown (dead stems mixed into the canopy)

use crate::mask::Mask;
use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// PUBLIC TYPES
// ============================================================================

/// Inclusive HSV range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBand {
    pub name: &'static str,
    pub low: [u8; 3],
    pub high: [u8; 3],
}

impl ColorBand {
    #[inline]
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] >= self.low[c] && hsv[c] <= self.high[c])
    }
}

pub const GREEN: ColorBand = ColorBand {
    name: "green",
    low: [35, 40, 40],
    high: [85, 255, 255],
};

pub const BROWN: ColorBand = ColorBand {
    name: "brown",
    low: [10, 50, 20],
    high: [20, 255, 200],
};

pub const YELLOW_GREEN: ColorBand = ColorBand {
    name: "yellow_green",
    low: [25, 30, 30],
    high: [45, 255, 255],
};

pub const DARK_GREEN: ColorBand = ColorBand {
    name: "dark_green",
    low: [60, 40, 20],
    high: [85, 255, 150],
};

pub const VEGETATION_BANDS: [ColorBand; 4] = [GREEN, BROWN, YELLOW_GREEN, DARK_GREEN];

const HSV_MAX: [u8; 3] = [179, 255, 255];

/// Global exposure measurements used to widen or narrow the bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationContext {
    /// Mean V / 255
    pub brightness: f64,
    /// Std V / 255
    pub contrast: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DominantColor {
    pub rgb: [u8; 3],
    /// Share of detected pixels assigned to this cluster [0, 1]
    pub fraction: f64,
}

// ============================================================================
// HSV CONVERSION
// ============================================================================

/// Convert RGB to HSV.
/// Returns (H: 0-360, S: 0-100, V: 0-255).
#[inline]
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let r_n = r / 255.0;
    let g_n = g / 255.0;
    let b_n = b / 255.0;

    let max = r_n.max(g_n).max(b_n);
    let min = r_n.min(g_n).min(b_n);
    let delta = max - min;

    let h = if delta < 1e-6 {
        0.0
    } else if (max - r_n).abs() < 1e-6 {
        60.0 * (((g_n - b_n) / delta) % 6.0)
    } else if (max - g_n).abs() < 1e-6 {
        60.0 * (((b_n - r_n) / delta) + 2.0)
    } else {
        60.0 * (((r_n - g_n) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max < 1e-6 { 0.0 } else { (delta / max) * 100.0 };
    let v = max * 255.0;

    (h, s, v)
}

/// 8-bit HSV triple (H 0-179).
#[inline]
pub fn rgb_to_hsv8(rgb: [u8; 3]) -> [u8; 3] {
    let (h, s, v) = rgb_to_hsv(rgb[0] as f32, rgb[1] as f32, rgb[2] as f32);
    let h8 = ((h / 2.0).round() as u32 % 180) as u8;
    let s8 = (s / 100.0 * 255.0).round().clamp(0.0, 255.0) as u8;
    [h8, s8, v.round().clamp(0.0, 255.0) as u8]
}

/// Inverse of [`rgb_to_hsv8`].
pub fn hsv8_to_rgb(hsv: [u8; 3]) -> [u8; 3] {
    let h = hsv[0] as f32 * 2.0;
    let s = hsv[1] as f32 / 255.0;
    let v = hsv[2] as f32 / 255.0;

    let c = v * s;
    let hp = (h / 60.0) % 6.0;
    let x = c * (1.0 - ((hp % 2.0) - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    let to_u8 = |f: f32| ((f + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    [to_u8(r1), to_u8(g1), to_u8(b1)]
}

/// HSV representation of an RGB image; channel 0 = H, 1 = S, 2 = V.
#[derive(Debug, Clone)]
pub struct HsvImage(RgbImage);

impl HsvImage {
    pub fn from_rgb(image: &RgbImage) -> Self {
        Self(RgbImage::from_fn(image.width(), image.height(), |x, y| {
            Rgb(rgb_to_hsv8(image.get_pixel(x, y).0))
        }))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [u8; 3] {
        self.0.get_pixel(x, y).0
    }

    pub fn channel(&self, c: usize) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| Luma([self.get(x, y)[c]]))
    }

    pub fn value_channel(&self) -> GrayImage {
        self.channel(2)
    }

    /// Same hue and saturation with a replaced value channel.
    pub fn with_value(&self, value: &GrayImage) -> Self {
        Self(RgbImage::from_fn(self.width(), self.height(), |x, y| {
            let [h, s, _] = self.get(x, y);
            Rgb([h, s, value.get_pixel(x, y)[0]])
        }))
    }

    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width(), self.height(), |x, y| Rgb(hsv8_to_rgb(self.get(x, y))))
    }

    pub fn in_band(&self, band: &ColorBand) -> Mask {
        Mask::from_fn(self.width(), self.height(), |x, y| band.contains(self.get(x, y)))
    }

    /// Union of several bands.
    pub fn in_any_band(&self, bands: &[ColorBand]) -> Mask {
        Mask::from_fn(self.width(), self.height(), |x, y| {
            let hsv = self.get(x, y);
            bands.iter().any(|b| b.contains(hsv))
        })
    }
}

// ============================================================================
// LAB CONVERSION
// ============================================================================

/// sRGB (D65) to CIE Lab. Returns (L: 0-100, a, b).
pub fn rgb_to_lab(rgb: [u8; 3]) -> (f32, f32, f32) {
    let lin = |c: u8| {
        let c = c as f32 / 255.0;
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };
    let (r, g, b) = (lin(rgb[0]), lin(rgb[1]), lin(rgb[2]));

    let x = (0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b) / 0.950_47;
    let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175 * b;
    let z = (0.019_333_9 * r + 0.119_192 * g + 0.950_304_1 * b) / 1.088_83;

    let f = |t: f32| {
        if t > 0.008_856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    };
    let (fx, fy, fz) = (f(x), f(y), f(z));
    (116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

// ============================================================================
// CALIBRATION
// ============================================================================

pub fn measure_calibration(hsv: &HsvImage) -> CalibrationContext {
    let (mean, std) = crate::imaging::gray_mean_std(&hsv.value_channel());
    CalibrationContext {
        brightness: mean / 255.0,
        contrast: std / 255.0,
    }
}

/// Adapt a band to the measured exposure.
///
/// Dark scenes widen the band (−5/−20/−20 on the low bound, +5/+20/+50 on
/// the high bound); high contrast lowers the saturation floor by 10, never
/// below 30. Returns the band and whether it was changed.
pub fn calibrate_band(
    band: &ColorBand,
    ctx: &CalibrationContext,
    brightness_threshold: f64,
    contrast_threshold: f64,
) -> (ColorBand, bool) {
    let mut out = *band;
    let mut changed = false;

    if ctx.brightness < brightness_threshold {
        const WIDEN_LOW: [u8; 3] = [5, 20, 20];
        const WIDEN_HIGH: [u8; 3] = [5, 20, 50];
        for c in 0..3 {
            out.low[c] = out.low[c].saturating_sub(WIDEN_LOW[c]);
            out.high[c] = out.high[c].saturating_add(WIDEN_HIGH[c]).min(HSV_MAX[c]);
        }
        changed = true;
    }

    if ctx.contrast > contrast_threshold {
        let narrowed = out.low[1].saturating_sub(10).max(30);
        if narrowed != out.low[1] {
            out.low[1] = narrowed;
            changed = true;
        }
    }

    if changed {
        debug!(
            "🎨 Calibrated band {}: low={:?} high={:?} (brightness={:.2}, contrast={:.2})",
            out.name, out.low, out.high, ctx.brightness, ctx.contrast
        );
    }
    (out, changed)
}

// ============================================================================
// DOMINANT COLORS
// ============================================================================

const MAX_KMEANS_SAMPLES: usize = 5000;
const KMEANS_ITERATIONS: usize = 10;

/// Deterministic k-means over the detected pixels, largest cluster first.
pub fn dominant_colors(image: &RgbImage, mask: &Mask, k: usize) -> Vec<DominantColor> {
    let mut samples: Vec<[f32; 3]> = Vec::new();
    for (x, y, p) in image.enumerate_pixels() {
        if x < mask.width() && y < mask.height() && mask.get(x, y) {
            samples.push([p[0] as f32, p[1] as f32, p[2] as f32]);
        }
    }
    if samples.is_empty() || k == 0 {
        return Vec::new();
    }
    if samples.len() > MAX_KMEANS_SAMPLES {
        let stride = samples.len().div_ceil(MAX_KMEANS_SAMPLES);
        samples = samples.into_iter().step_by(stride).collect();
    }
    let k = k.min(samples.len());

    // Farthest-point seeding from the median-luma sample.
    let luma = |c: &[f32; 3]| 0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2];
    let mut by_luma = samples.clone();
    by_luma.sort_by(|a, b| luma(a).total_cmp(&luma(b)));
    let mut centers: Vec<[f32; 3]> = vec![by_luma[by_luma.len() / 2]];
    while centers.len() < k {
        let farthest = samples
            .iter()
            .map(|s| (s, sq_dist(s, &centers[nearest_center(s, &centers)])))
            .fold((samples[0], -1.0f32), |best, (s, d)| if d > best.1 { (*s, d) } else { best });
        centers.push(farthest.0);
    }

    let mut assignment = vec![0usize; samples.len()];
    for _ in 0..KMEANS_ITERATIONS {
        for (i, s) in samples.iter().enumerate() {
            assignment[i] = nearest_center(s, &centers);
        }
        let mut sums = vec![[0.0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for (s, &a) in samples.iter().zip(&assignment) {
            for c in 0..3 {
                sums[a][c] += s[c] as f64;
            }
            counts[a] += 1;
        }
        for j in 0..k {
            if counts[j] > 0 {
                for c in 0..3 {
                    centers[j][c] = (sums[j][c] / counts[j] as f64) as f32;
                }
            }
        }
    }

    let mut counts = vec![0usize; k];
    for s in &samples {
        counts[nearest_center(s, &centers)] += 1;
    }
    let total = samples.len() as f64;
    let mut out: Vec<DominantColor> = centers
        .iter()
        .zip(&counts)
        .filter(|(_, &n)| n > 0)
        .map(|(c, &n)| DominantColor {
            rgb: [
                c[0].round().clamp(0.0, 255.0) as u8,
                c[1].round().clamp(0.0, 255.0) as u8,
                c[2].round().clamp(0.0, 255.0) as u8,
            ],
            fraction: n as f64 / total,
        })
        .collect();
    out.sort_by(|a, b| b.fraction.total_cmp(&a.fraction));
    out
}

#[inline]
fn sq_dist(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    (0..3).map(|i| (a[i] - b[i]).powi(2)).sum()
}

fn nearest_center(s: &[f32; 3], centers: &[[f32; 3]]) -> usize {
    let mut best = 0;
    let mut best_d = f32::MAX;
    for (j, c) in centers.iter().enumerate() {
        let d = sq_dist(s, c);
        if d < best_d {
            best_d = d;
            best = j;
        }
    }
    best
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_hsv_red() {
        let (h, s, v) = rgb_to_hsv(255.0, 0.0, 0.0);
        assert!((h - 0.0).abs() < 1.0);
        assert!((s - 100.0).abs() < 1.0);
        assert!((v - 255.0).abs() < 1.0);
    }

    #[test]
    fn test_hsv8_pure_green() {
        assert_eq!(rgb_to_hsv8([0, 255, 0]), [60, 255, 255]);
        assert!(GREEN.contains(rgb_to_hsv8([0, 255, 0])));
    }

    #[test]
    fn test_hsv8_gray_not_vegetation() {
        let hsv = rgb_to_hsv8([128, 128, 128]);
        assert_eq!(hsv[1], 0);
        assert!(!VEGETATION_BANDS.iter().any(|b| b.contains(hsv)));
    }

    #[test]
    fn test_hsv_round_trip_close() {
        for rgb in [[34u8, 139, 34], [200, 180, 40], [10, 60, 200]] {
            let back = hsv8_to_rgb(rgb_to_hsv8(rgb));
            for c in 0..3 {
                assert!((back[c] as i32 - rgb[c] as i32).abs() <= 4, "{:?} -> {:?}", rgb, back);
            }
        }
    }

    #[test]
    fn test_calibration_dark_widens() {
        let ctx = CalibrationContext { brightness: 0.1, contrast: 0.2 };
        let (band, changed) = calibrate_band(&GREEN, &ctx, 0.3, 0.4);
        assert!(changed);
        assert_eq!(band.low, [30, 20, 20]);
        assert_eq!(band.high, [90, 255, 255]);
    }

    #[test]
    fn test_calibration_high_contrast_floor() {
        let ctx = CalibrationContext { brightness: 0.5, contrast: 0.5 };
        let (band, changed) = calibrate_band(&GREEN, &ctx, 0.3, 0.4);
        assert!(changed);
        assert_eq!(band.low[1], 30);
        let (yg, _) = calibrate_band(&YELLOW_GREEN, &ctx, 0.3, 0.4);
        assert_eq!(yg.low[1], 30);
    }

    #[test]
    fn test_calibration_neutral_unchanged() {
        let ctx = CalibrationContext { brightness: 0.5, contrast: 0.2 };
        let (band, changed) = calibrate_band(&BROWN, &ctx, 0.3, 0.4);
        assert!(!changed);
        assert_eq!(band, BROWN);
    }

    #[test]
    fn test_lab_green_negative_a() {
        let (l, a, _) = rgb_to_lab([0, 200, 0]);
        assert!(l > 50.0);
        assert!(a < -40.0);
    }

    #[test]
    fn test_dominant_colors_two_clusters() {
        let image = RgbImage::from_fn(20, 20, |x, _| {
            if x < 15 { Rgb([30, 160, 30]) } else { Rgb([120, 90, 40]) }
        });
        let mask = Mask::from_fn(20, 20, |_, _| true);
        let colors = dominant_colors(&image, &mask, 2);
        assert_eq!(colors.len(), 2);
        assert_eq!(colors[0].rgb, [30, 160, 30]);
        assert!((colors[0].fraction - 0.75).abs() < 1e-9);
    }
}
