// src/preprocessing.rs
//
// Image enhancement and resizing ahead of classification:
//   - contrast-limited adaptive histogram equalization (CLAHE)
//   - mild sharpening for poorly focused captures
//   - precision-mode enhancement
//   - working-resolution scaling and model tensor preparation

use crate::color_analysis::HsvImage;
use anyhow::{ensure, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::borrow::Cow;
use tracing::debug;

/// Image handed to the classifiers. `equalized` records whether CLAHE has
/// already run so it is never applied a second time.
#[derive(Debug, Clone)]
pub struct WorkingImage<'a> {
    pub image: Cow<'a, RgbImage>,
    pub equalized: bool,
}

impl<'a> WorkingImage<'a> {
    pub fn borrowed(image: &'a RgbImage) -> Self {
        Self {
            image: Cow::Borrowed(image),
            equalized: false,
        }
    }

    pub fn owned(image: RgbImage, equalized: bool) -> WorkingImage<'static> {
        WorkingImage {
            image: Cow::Owned(image),
            equalized,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

// ============================================================================
// CLAHE
// ============================================================================

/// Contrast-limited adaptive histogram equalization on a single channel.
///
/// # Arguments
/// * `clip_limit` - Histogram clip relative to a uniform distribution
/// * `grid` - Number of tiles along each axis
pub fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let grid = grid.max(1);
    let tw = w.div_ceil(grid.min(w));
    let th = h.div_ceil(grid.min(h));
    let gx = w.div_ceil(tw);
    let gy = h.div_ceil(th);

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity((gx * gy) as usize);
    for ty in 0..gy {
        for tx in 0..gx {
            // Edge tiles are padded by replicating the border so every
            // tile has the same area.
            let mut hist = [0u32; 256];
            for y in ty * th..(ty + 1) * th {
                for x in tx * tw..(tx + 1) * tw {
                    hist[gray.get_pixel(x.min(w - 1), y.min(h - 1))[0] as usize] += 1;
                }
            }
            luts.push(tile_lut(&mut hist, tw * th, clip_limit));
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;
        let (tx0, tx1, ax) = interp_axis(x, tw, gx);
        let (ty0, ty1, ay) = interp_axis(y, th, gy);
        let at = |tx: u32, ty: u32| luts[(ty * gx + tx) as usize][v] as f32;
        let top = at(tx0, ty0) * (1.0 - ax) + at(tx1, ty0) * ax;
        let bottom = at(tx0, ty1) * (1.0 - ax) + at(tx1, ty1) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }
    if clip_limit > 0.0 {
        let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                excess += *bin - clip;
                *bin = clip;
            }
        }
        let per_bin = excess / 256;
        let residual = (excess % 256) as usize;
        for bin in hist.iter_mut() {
            *bin += per_bin;
        }
        if residual > 0 {
            let step = (256 / residual).max(1);
            for i in (0..256).step_by(step).take(residual) {
                hist[i] += 1;
            }
        }
    }
    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Neighbouring tile indices and blend factor along one axis.
#[inline]
fn interp_axis(pos: u32, tile: u32, tiles: u32) -> (u32, u32, f32) {
    let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let i0 = (f.floor() as u32).min(tiles - 1);
    let i1 = (i0 + 1).min(tiles - 1);
    let a = if i1 == i0 { 0.0 } else { f - i0 as f32 };
    (i0, i1, a)
}

/// CLAHE on the HSV value channel, keeping hue and saturation.
pub fn equalize_value(image: &RgbImage, clip_limit: f32, grid: u32) -> RgbImage {
    let hsv = HsvImage::from_rgb(image);
    let value = clahe(&hsv.value_channel(), clip_limit, grid);
    hsv.with_value(&value).to_rgb()
}

/// Apply value-channel CLAHE unless the image was already equalized.
pub fn equalize_once<'a>(input: &WorkingImage<'a>, clip_limit: f32, grid: u32) -> WorkingImage<'a> {
    if input.equalized {
        return input.clone();
    }
    WorkingImage {
        image: Cow::Owned(equalize_value(&input.image, clip_limit, grid)),
        equalized: true,
    }
}

// ============================================================================
// SHARPENING
// ============================================================================

const SHARPEN_ORIGINAL_WEIGHT: f32 = 0.7;
const SHARPEN_WEIGHT: f32 = 0.3;

fn sharpen_at(get: impl Fn(i64, i64) -> f32, x: i64, y: i64) -> f32 {
    let mut acc = 0.0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let k = if dx == 0 && dy == 0 { 9.0 } else { -1.0 };
            acc += k * get(x + dx, y + dy);
        }
    }
    acc.clamp(0.0, 255.0)
}

/// Blend 0.7 original + 0.3 of a 3×3 sharpened copy.
pub fn sharpen_blend_gray(gray: &GrayImage) -> GrayImage {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    let get = |x: i64, y: i64| gray.get_pixel(x.clamp(0, w - 1) as u32, y.clamp(0, h - 1) as u32)[0] as f32;
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let s = sharpen_at(get, x as i64, y as i64);
        let o = gray.get_pixel(x, y)[0] as f32;
        Luma([(SHARPEN_ORIGINAL_WEIGHT * o + SHARPEN_WEIGHT * s).round().clamp(0.0, 255.0) as u8])
    })
}

pub fn sharpen_blend_rgb(image: &RgbImage) -> RgbImage {
    let (w, h) = (image.width() as i64, image.height() as i64);
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let mut out = [0u8; 3];
        for (c, slot) in out.iter_mut().enumerate() {
            let get = |px: i64, py: i64| {
                image.get_pixel(px.clamp(0, w - 1) as u32, py.clamp(0, h - 1) as u32)[c] as f32
            };
            let s = sharpen_at(get, x as i64, y as i64);
            let o = image.get_pixel(x, y)[c] as f32;
            *slot = (SHARPEN_ORIGINAL_WEIGHT * o + SHARPEN_WEIGHT * s).round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

// ============================================================================
// PRECISION ENHANCEMENT
// ============================================================================

const PRECISION_CLAHE_CLIP: f32 = 3.0;
const PRECISION_DENOISE_SIGMA: f32 = 0.8;

/// Equalize, denoise and sharpen ahead of high-fidelity detection.
pub fn precision_enhance<'a>(input: &WorkingImage<'a>, grid: u32) -> WorkingImage<'static> {
    let equalized = equalize_once(input, PRECISION_CLAHE_CLIP, grid);
    let denoised = imageproc::filter::gaussian_blur_f32(&*equalized.image, PRECISION_DENOISE_SIGMA);
    debug!("🔧 Precision enhancement applied ({}x{})", denoised.width(), denoised.height());
    WorkingImage::owned(sharpen_blend_rgb(&denoised), true)
}

// ============================================================================
// RESIZING
// ============================================================================

/// Downscale so the image fits within `max_w`×`max_h`, keeping aspect.
pub fn fit_within(image: &RgbImage, max_w: u32, max_h: u32) -> Cow<'_, RgbImage> {
    let (w, h) = image.dimensions();
    if w <= max_w && h <= max_h {
        return Cow::Borrowed(image);
    }
    let scale = (max_w as f64 / w as f64).min(max_h as f64 / h as f64);
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    debug!("📐 Downscaling {}x{} -> {}x{}", w, h, nw, nh);
    Cow::Owned(imageops::resize(image, nw, nh, FilterType::Triangle))
}

/// Uniform scale with bilinear filtering; never collapses below 1×1.
pub fn scale_image(image: &RgbImage, factor: f32) -> RgbImage {
    let nw = ((image.width() as f32 * factor).round() as u32).max(1);
    let nh = ((image.height() as f32 * factor).round() as u32).max(1);
    if (nw, nh) == image.dimensions() {
        return image.clone();
    }
    imageops::resize(image, nw, nh, FilterType::Triangle)
}

/// Resize and normalize an RGB image into a CHW tensor for the
/// segmentation model (ImageNet mean/std).
pub fn to_model_tensor(image: &RgbImage, dst_width: u32, dst_height: u32) -> Result<Vec<f32>> {
    ensure!(dst_width > 0 && dst_height > 0, "model input size must be positive");
    let resized = imageops::resize(image, dst_width, dst_height, FilterType::Triangle);

    const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const STD: [f32; 3] = [0.229, 0.224, 0.225];

    let (w, h) = (dst_width as usize, dst_height as usize);
    let mut output = vec![0.0f32; 3 * h * w];
    for (x, y, p) in resized.enumerate_pixels() {
        for c in 0..3 {
            let chw_idx = c * h * w + y as usize * w + x as usize;
            output[chw_idx] = (p[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clahe_keeps_dimensions_and_flat_stays_flat() {
        let gray = GrayImage::from_pixel(37, 23, Luma([100]));
        let out = clahe(&gray, 2.0, 8);
        assert_eq!(out.dimensions(), (37, 23));
        let first = out.get_pixel(0, 0)[0];
        assert!(out.as_raw().iter().all(|&v| v == first));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        let gray = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 8) as u8]));
        let out = clahe(&gray, 2.0, 8);
        let (lo, hi) = out.as_raw().iter().fold((255u8, 0u8), |(a, b), &v| (a.min(v), b.max(v)));
        assert!(hi - lo > 7);
    }

    #[test]
    fn test_equalize_once_is_idempotent() {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 8) as u8, 120, (y * 8) as u8]));
        let once = equalize_once(&WorkingImage::borrowed(&img), 2.0, 8);
        assert!(once.equalized);
        let twice = equalize_once(&once, 2.0, 8);
        assert_eq!(*once.image, *twice.image);
    }

    #[test]
    fn test_sharpen_flat_unchanged() {
        let gray = GrayImage::from_pixel(8, 8, Luma([90]));
        assert_eq!(sharpen_blend_gray(&gray), gray);
    }

    #[test]
    fn test_fit_within() {
        let img = RgbImage::new(3840, 1080);
        let fitted = fit_within(&img, 1920, 1080);
        assert_eq!(fitted.dimensions(), (1920, 540));
        let small = RgbImage::new(100, 100);
        assert!(matches!(fit_within(&small, 1920, 1080), Cow::Borrowed(_)));
    }

    #[test]
    fn test_model_tensor_layout() {
        let img = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
        let tensor = to_model_tensor(&img, 4, 4).unwrap();
        assert_eq!(tensor.len(), 3 * 4 * 4);
        assert!((tensor[0] - (1.0 - 0.485) / 0.229).abs() < 1e-4);
        assert!((tensor[16] - (0.0 - 0.456) / 0.224).abs() < 1e-4);
    }
}
