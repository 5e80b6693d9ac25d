// src/detection/texture.rs
//
// Texture classifier. Grass is a dense field of thin, randomly oriented
// blades: strong local gradients, energy in every direction of a Gabor
// bank, noisy local binary patterns and high local variance.
//
// Four channels, each min-max normalized to 0..255, fused by weighted sum:
//   gradient  : Sobel magnitude (always)
//   gabor     : mean response of the directional bank (skipped in realtime)
//   lbp       : local binary pattern map (skipped in realtime)
//   variance  : windowed variance, or |gray − blur| in realtime
//
// Weights always sum to 1.0: skipped channels hand their weight to variance.
// A channel with zero weight is never computed.

use crate::analysis::confidence;
use crate::imaging::{self, FloatImage};
use crate::mask::Mask;
use crate::mode::ModeProfile;
use crate::preprocessing::{self, WorkingImage};
use crate::types::{MethodDiagnostics, MethodKind, MethodStats, TextureConfig, TextureDiagnostics};
use anyhow::{ensure, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::filter::Kernel;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use std::f32::consts::PI;
use tracing::debug;

const CONTRAST_THRESHOLD: f64 = 0.4;
const CLAHE_CLIP: f32 = 2.0;
const CLAHE_GRID: u32 = 8;
const POOR_FOCUS_VARIANCE: f64 = 100.0;
/// Sigma of the 9×9 Gaussian used by the realtime variance estimate.
const FAST_VARIANCE_SIGMA: f32 = 1.7;
const REALTIME_CONFIDENCE_DIVISOR: f64 = 50.0;
const REALTIME_CONFIDENCE_CAP: f64 = 0.8;
const CLOSE_KERNEL: u32 = 7;
/// Long-side cap for the Gabor bank.
pub const GABOR_MAX_SIDE: u32 = 480;
pub const MAX_LBP_POINTS: u32 = 8;

// ============================================================================
// WEIGHTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureWeights {
    pub gradient: f32,
    pub gabor: f32,
    pub lbp: f32,
    pub variance: f32,
}

impl TextureWeights {
    pub fn for_channels(use_gabor: bool, use_lbp: bool) -> Self {
        let gradient = 0.5;
        let gabor = if use_gabor { 0.3 } else { 0.0 };
        let lbp = if use_lbp { 0.2 } else { 0.0 };
        Self {
            gradient,
            gabor,
            lbp,
            variance: (1.0 - gradient - gabor - lbp).max(0.0),
        }
    }

    pub fn sum(&self) -> f32 {
        self.gradient + self.gabor + self.lbp + self.variance
    }
}

// ============================================================================
// CHANNELS
// ============================================================================

/// Sobel gradient magnitude.
pub fn gradient_magnitude(gray: &GrayImage) -> FloatImage {
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);
    FloatImage::from_fn(gray.width(), gray.height(), |x, y| {
        let dx = gx.get_pixel(x, y)[0] as f32;
        let dy = gy.get_pixel(x, y)[0] as f32;
        Luma([(dx * dx + dy * dy).sqrt()])
    })
}

/// Real Gabor kernel, `size`×`size`, wavelength `lambda`, phase 0.
pub fn gabor_kernel(size: u32, sigma: f32, theta: f32, lambda: f32, gamma: f32) -> Vec<f32> {
    let half = (size / 2) as i32;
    let (sin_t, cos_t) = theta.sin_cos();
    let ex = -0.5 / (sigma * sigma);
    let ey = -0.5 * gamma * gamma / (sigma * sigma);
    let mut kernel = Vec::with_capacity((size * size) as usize);
    for y in -half..=half {
        for x in -half..=half {
            let (xf, yf) = (x as f32, y as f32);
            let xr = xf * cos_t + yf * sin_t;
            let yr = -xf * sin_t + yf * cos_t;
            kernel.push((ex * xr * xr + ey * yr * yr).exp() * (2.0 * PI * xr / lambda).cos());
        }
    }
    kernel
}

/// Side of the odd kernel `gabor_kernel` builds for a requested `size`.
fn gabor_side(size: u32) -> u32 {
    2 * (size / 2) + 1
}

/// Mean saturated response over every (angle, frequency) pair of the bank.
///
/// Frames larger than `GABOR_MAX_SIDE` on their long side are filtered at
/// that size and the response is upsampled back.
pub fn gabor_response(gray: &GrayImage, config: &TextureConfig) -> FloatImage {
    let (w, h) = gray.dimensions();
    let long_side = w.max(h);
    if long_side <= GABOR_MAX_SIDE {
        return gabor_bank(gray, config);
    }
    let scale = GABOR_MAX_SIDE as f32 / long_side as f32;
    let sw = ((w as f32 * scale).round() as u32).max(1);
    let sh = ((h as f32 * scale).round() as u32).max(1);
    let small = imageops::resize(gray, sw, sh, FilterType::Triangle);
    // Float resampling clamps to 0..=1, so the 0..=255 response is rescaled around it.
    let mut response = gabor_bank(&small, config);
    response.iter_mut().for_each(|v| *v /= 255.0);
    let mut full = imageops::resize(&response, w, h, FilterType::Triangle);
    full.iter_mut().for_each(|v| *v *= 255.0);
    full
}

fn gabor_bank(gray: &GrayImage, config: &TextureConfig) -> FloatImage {
    let (w, h) = gray.dimensions();
    let side = gabor_side(config.gabor_kernel_size);
    let mut acc = FloatImage::new(w, h);
    let mut count = 0u32;
    for &angle in &config.gabor_angles {
        for &freq in &config.gabor_frequencies {
            if freq <= 0.0 {
                continue;
            }
            let kernel = gabor_kernel(
                config.gabor_kernel_size,
                config.gabor_sigma,
                angle.to_radians(),
                1.0 / freq,
                config.gabor_gamma,
            );
            let response = Kernel::new(&kernel, side, side)
                .filter::<_, _, Luma<f32>>(gray, |out: &mut f32, v: f32| *out = v.round().clamp(0.0, 255.0));
            for (a, r) in acc.iter_mut().zip(response.iter()) {
                *a += r;
            }
            count += 1;
        }
    }
    let n = count.max(1) as f32;
    acc.iter_mut().for_each(|v| *v /= n);
    acc
}

/// Circular local binary pattern with strict comparisons, so flat areas
/// code to 0. Pixels closer than `radius` to the border are left at 0.
/// At most `MAX_LBP_POINTS` samples are taken so every code fits a byte.
pub fn local_binary_pattern(gray: &GrayImage, radius: u32, points: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let points = points.min(MAX_LBP_POINTS);
    let offsets: Vec<(i64, i64)> = (0..points)
        .map(|p| {
            let angle = 2.0 * std::f64::consts::PI * p as f64 / points as f64;
            (
                (radius as f64 * angle.cos()).round() as i64,
                (-(radius as f64) * angle.sin()).round() as i64,
            )
        })
        .collect();
    GrayImage::from_fn(w, h, |x, y| {
        if x < radius || y < radius || x + radius >= w || y + radius >= h {
            return Luma([0]);
        }
        let center = gray.get_pixel(x, y)[0];
        let mut code: u8 = 0;
        for (p, (dx, dy)) in offsets.iter().enumerate() {
            let nx = (x as i64 + dx) as u32;
            let ny = (y as i64 + dy) as u32;
            if gray.get_pixel(nx, ny)[0] > center {
                code |= 1 << p;
            }
        }
        Luma([code])
    })
}

/// |gray − GaussianBlur(gray)|.
pub fn fast_variance(gray: &GrayImage) -> FloatImage {
    let blurred = imageproc::filter::gaussian_blur_f32(gray, FAST_VARIANCE_SIGMA);
    FloatImage::from_fn(gray.width(), gray.height(), |x, y| {
        let d = gray.get_pixel(x, y)[0] as f32 - blurred.get_pixel(x, y)[0] as f32;
        Luma([d.abs()])
    })
}

/// Normalized channel maps. A channel with zero weight is not computed.
pub(crate) struct TextureChannels {
    pub gradient: GrayImage,
    pub gabor: Option<GrayImage>,
    pub lbp: Option<GrayImage>,
    pub lbp_raw: Option<GrayImage>,
    pub variance: Option<GrayImage>,
}

impl TextureChannels {
    pub(crate) fn compute(gray: &GrayImage, config: &TextureConfig, weights: &TextureWeights, realtime: bool) -> Self {
        let gradient = imaging::normalize_to_u8(&gradient_magnitude(gray));
        let gabor = (weights.gabor > 0.0).then(|| imaging::normalize_to_u8(&gabor_response(gray, config)));
        let lbp_raw =
            (weights.lbp > 0.0).then(|| local_binary_pattern(gray, config.lbp_radius, config.lbp_points));
        let lbp = lbp_raw.as_ref().map(|l| imaging::normalize_to_u8(&imaging::to_float(l)));
        let variance = (weights.variance > 0.0).then(|| {
            if realtime {
                imaging::normalize_to_u8(&fast_variance(gray))
            } else {
                imaging::normalize_to_u8(&imaging::box_variance(&imaging::to_float(gray), config.variance_window))
            }
        });
        Self {
            gradient,
            gabor,
            lbp,
            lbp_raw,
            variance,
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct TextureClassifier<'a> {
    config: &'a TextureConfig,
}

impl<'a> TextureClassifier<'a> {
    pub fn new(config: &'a TextureConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, input: &WorkingImage<'_>, profile: &ModeProfile) -> Result<(Mask, MethodStats)> {
        ensure!(input.width() > 0 && input.height() > 0, "empty image");
        let (orig_w, orig_h) = (input.width(), input.height());
        let realtime = profile.fast_variance;

        let source_gray = imaging::to_gray(&input.image);
        let mut gray = if profile.texture_scale < 1.0 {
            let nw = ((orig_w as f32 * profile.texture_scale).round() as u32).max(1);
            let nh = ((orig_h as f32 * profile.texture_scale).round() as u32).max(1);
            imageops::resize(&source_gray, nw, nh, FilterType::Triangle)
        } else {
            source_gray.clone()
        };

        let mut clahe_applied = false;
        let mut edge_enhanced = false;
        if !realtime {
            let (_, std) = imaging::gray_mean_std(&gray);
            if std / 255.0 < CONTRAST_THRESHOLD && !input.equalized {
                gray = preprocessing::clahe(&gray, CLAHE_CLIP, CLAHE_GRID);
                clahe_applied = true;
            }
            if imaging::laplacian_variance(&gray) < POOR_FOCUS_VARIANCE {
                gray = preprocessing::sharpen_blend_gray(&gray);
                edge_enhanced = true;
            }
        }

        let weights = TextureWeights::for_channels(profile.use_filter_bank, profile.use_local_patterns);
        let channels = TextureChannels::compute(&gray, self.config, &weights, realtime);

        let score = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let mut v = weights.gradient * channels.gradient.get_pixel(x, y)[0] as f32;
            if let Some(g) = &channels.gabor {
                v += weights.gabor * g.get_pixel(x, y)[0] as f32;
            }
            if let Some(l) = &channels.lbp {
                v += weights.lbp * l.get_pixel(x, y)[0] as f32;
            }
            if let Some(var) = &channels.variance {
                v += weights.variance * var.get_pixel(x, y)[0] as f32;
            }
            Luma([v.round().clamp(0.0, 255.0) as u8])
        });

        let threshold = if self.config.adaptive_threshold && !realtime {
            imageproc::contrast::otsu_level(&score)
        } else {
            self.config.fixed_threshold
        };
        let raw = Mask::from_fn(score.width(), score.height(), |x, y| {
            score.get_pixel(x, y)[0] > threshold
        });

        let mut mask = if realtime {
            imaging::close(&raw, 3)
        } else {
            let m = imaging::dilate(&imaging::close(&imaging::open(&raw, 3), CLOSE_KERNEL), 3);
            imaging::remove_small_components(&m, self.config.min_area as u64)
        };
        if mask.dimensions() != (orig_w, orig_h) {
            mask = mask.resize_nearest(orig_w, orig_h);
        }

        let (avg_score, std_score) = imaging::mean_std(score.as_raw().iter().map(|&v| v as f64));
        let max_score = score.as_raw().iter().copied().max().unwrap_or(0) as f64;
        let lbp_variance = channels
            .lbp_raw
            .as_ref()
            .map(imaging::laplacian_variance)
            .unwrap_or(0.0);

        let components = imaging::components(&mask);
        let confidence_score = if profile.simple_confidence {
            confidence::linear_confidence(
                mask.coverage_percentage(),
                REALTIME_CONFIDENCE_DIVISOR,
                REALTIME_CONFIDENCE_CAP,
            )
        } else {
            confidence::score(&mask, &components, imaging::laplacian_variance(&source_gray)).score
        };

        debug!(
            "🌾 Texture: coverage={:.2}% conf={:.3} threshold={} realtime={} weights=[{:.1},{:.1},{:.1},{:.1}]",
            mask.coverage_percentage(),
            confidence_score,
            threshold,
            realtime,
            weights.gradient,
            weights.gabor,
            weights.lbp,
            weights.variance
        );

        let stats = MethodStats {
            method: MethodKind::Texture,
            coverage_percentage: mask.coverage_percentage(),
            confidence_score,
            grass_pixels: mask.count(),
            total_pixels: mask.total_pixels(),
            num_components: components.len(),
            diagnostics: MethodDiagnostics::Texture(TextureDiagnostics {
                avg_texture_score: avg_score,
                max_texture_score: max_score,
                texture_complexity: if avg_score > 0.0 { std_score / avg_score } else { 0.0 },
                lbp_variance,
                threshold_used: threshold,
                realtime,
                clahe_applied,
                edge_enhanced,
                gradient_weight: weights.gradient,
                gabor_weight: weights.gabor,
                lbp_weight: weights.lbp,
                variance_weight: weights.variance,
            }),
        };
        Ok((mask, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Config, Mode};
    use image::{Rgb, RgbImage};

    fn noisy_patch() -> RgbImage {
        // Left half: high-frequency pseudo-random texture. Right half: flat.
        let mut state: u32 = 12345;
        RgbImage::from_fn(120, 80, |x, _| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            if x < 60 {
                let v = ((state >> 16) % 200) as u8;
                Rgb([v / 3, v, v / 4])
            } else {
                Rgb([120, 120, 120])
            }
        })
    }

    #[test]
    fn test_weights_sum_to_one() {
        for (g, l) in [(true, true), (false, false), (true, false), (false, true)] {
            let w = TextureWeights::for_channels(g, l);
            assert!((w.sum() - 1.0).abs() < 1e-6);
        }
        let full = TextureWeights::for_channels(true, true);
        assert_eq!((full.gradient, full.gabor, full.lbp), (0.5, 0.3, 0.2));
        let fast = TextureWeights::for_channels(false, false);
        assert_eq!((fast.gradient, fast.variance), (0.5, 0.5));
    }

    #[test]
    fn test_gabor_kernel_shape() {
        let k = gabor_kernel(21, 4.0, 0.0, 10.0, 0.5);
        assert_eq!(k.len(), 441);
        assert!((k[220] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_lbp_codes() {
        let flat = GrayImage::from_pixel(10, 10, Luma([50]));
        assert!(local_binary_pattern(&flat, 3, 8).as_raw().iter().all(|&v| v == 0));

        // Dark centre: every neighbour is brighter.
        let mut pit = GrayImage::from_pixel(10, 10, Luma([50]));
        pit.put_pixel(5, 5, Luma([10]));
        let lbp = local_binary_pattern(&pit, 3, 8);
        assert_eq!(lbp.get_pixel(5, 5)[0], 255);
        assert_eq!(lbp.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_lbp_points_capped_to_byte() {
        let mut pit = GrayImage::from_pixel(10, 10, Luma([50]));
        pit.put_pixel(5, 5, Luma([10]));
        assert_eq!(local_binary_pattern(&pit, 3, 16), local_binary_pattern(&pit, 3, 8));
        assert_eq!(local_binary_pattern(&pit, 3, 16).get_pixel(5, 5)[0], 255);
    }

    #[test]
    fn test_zero_weight_channels_not_computed() {
        let gray = imaging::to_gray(&noisy_patch());
        let config = TextureConfig::default();

        let full = TextureWeights::for_channels(true, true);
        assert_eq!(full.variance, 0.0);
        let channels = TextureChannels::compute(&gray, &config, &full, false);
        assert!(channels.gabor.is_some() && channels.lbp.is_some());
        assert!(channels.variance.is_none());

        let fast = TextureWeights::for_channels(false, false);
        let channels = TextureChannels::compute(&gray, &config, &fast, true);
        assert!(channels.gabor.is_none() && channels.lbp.is_none() && channels.lbp_raw.is_none());
        assert!(channels.variance.is_some());
    }

    #[test]
    fn test_gabor_large_frame_keeps_size() {
        let config = TextureConfig {
            gabor_kernel_size: 5,
            gabor_angles: vec![45.0],
            gabor_frequencies: vec![0.05],
            ..TextureConfig::default()
        };
        let flat = GrayImage::from_pixel(1200, 700, Luma([90]));
        let response = gabor_response(&flat, &config);
        assert_eq!(response.dimensions(), (1200, 700));
        let first = response.get_pixel(0, 0)[0];
        assert!(first > 1.0);
        assert!(response.iter().all(|&v| (v - first).abs() < 1e-2));

        let small = GrayImage::from_pixel(64, 48, Luma([90]));
        let small_response = gabor_response(&small, &config);
        assert!((small_response.get_pixel(10, 10)[0] - first).abs() < 1e-2);
    }

    #[test]
    fn test_gabor_even_kernel_size() {
        let mut config = TextureConfig::default();
        config.gabor_kernel_size = 20;
        let gray = imaging::to_gray(&noisy_patch());
        assert_eq!(gabor_response(&gray, &config).dimensions(), (120, 80));
    }

    #[test]
    fn test_texture_finds_noisy_half() {
        let config = Config::default();
        let profile = ModeProfile::for_mode(Mode::Standard, &config);
        let img = noisy_patch();
        let (mask, stats) = TextureClassifier::new(&config.texture)
            .detect(&WorkingImage::borrowed(&img), &profile)
            .unwrap();
        assert_eq!(mask.dimensions(), (120, 80));
        let left = (0..80).flat_map(|y| (0..50).map(move |x| (x, y))).filter(|&(x, y)| mask.get(x, y)).count();
        let right = (0..80).flat_map(|y| (70..120).map(move |x| (x, y))).filter(|&(x, y)| mask.get(x, y)).count();
        assert!(left > right);
        assert!(stats.confidence_score >= 0.0 && stats.confidence_score <= 1.0);
    }

    #[test]
    fn test_realtime_mask_upscaled() {
        let config = Config::default();
        let profile = ModeProfile::for_mode(Mode::Realtime, &config);
        let img = noisy_patch();
        let (mask, stats) = TextureClassifier::new(&config.texture)
            .detect(&WorkingImage::borrowed(&img), &profile)
            .unwrap();
        assert_eq!(mask.dimensions(), (120, 80));
        assert!(stats.confidence_score <= 0.8);
        match stats.diagnostics {
            MethodDiagnostics::Texture(d) => {
                assert!(d.realtime);
                assert_eq!(d.threshold_used, 30);
                assert_eq!(d.gabor_weight, 0.0);
            }
            _ => panic!("wrong diagnostics"),
        }
    }

    #[test]
    fn test_flat_image_no_texture() {
        let config = Config::default();
        let profile = ModeProfile::for_mode(Mode::Standard, &config);
        let img = RgbImage::from_pixel(60, 60, Rgb([128, 128, 128]));
        let (mask, _) = TextureClassifier::new(&config.texture)
            .detect(&WorkingImage::borrowed(&img), &profile)
            .unwrap();
        assert!(mask.is_empty());
    }
}
