// src/detection/simulation.rs
//
// Deterministic analytic stand-in for a trained segmentation network.
//
//   probability = sigmoid(8 · (smooth(vegetation × context × (1 − exclusion)) − 0.4))
//
// vegetation: HSV green bands, Lab chlorophyll, simulated NDVI, excess green
// context   : filter-bank texture, moderate gradients, local consistency
// exclusion : saturated artificial colors, glare, deep shadow, gray tones,
//             smooth surfaces, skin tones
//
// No noise is injected: identical inputs give identical maps.

use super::texture::{gabor_response, gradient_magnitude};
use crate::color_analysis::{rgb_to_hsv8, rgb_to_lab};
use crate::imaging::{self, FloatImage};
use crate::mask::ProbabilityMap;
use crate::types::TextureConfig;
use image::{Luma, RgbImage};

const SIGMOID_GAIN: f32 = 8.0;
const SIGMOID_CENTER: f32 = 0.4;
const SMOOTHING_SIGMA: f32 = 1.5;

/// HSV triple scaled to [0, 1], hue as a fraction of the full circle.
#[inline]
fn unit_hsv(rgb: [u8; 3]) -> (f32, f32, f32) {
    let [h, s, v] = rgb_to_hsv8(rgb);
    (h as f32 / 180.0, s as f32 / 255.0, v as f32 / 255.0)
}

/// Per-pixel vegetation likelihood in [0, 1].
pub fn vegetation_score(image: &RgbImage) -> FloatImage {
    FloatImage::from_fn(image.width(), image.height(), |x, y| {
        let rgb = image.get_pixel(x, y).0;
        let (h, s, v) = unit_hsv(rgb);

        let natural = h > 0.28 && h < 0.42 && s > 0.4 && s < 0.9 && v > 0.25 && v < 0.85;
        let grass = h > 0.25 && h < 0.35 && s > 0.3 && s < 0.7 && v > 0.3 && v < 0.7;
        let foliage = h > 0.35 && h < 0.48 && s > 0.5 && s < 0.95 && v > 0.2 && v < 0.8;
        let color_quality = s.min(1.0 - (v - 0.5).abs());
        let green = (natural as u8 as f32 * 0.4 + grass as u8 as f32 * 0.4 + foliage as u8 as f32 * 0.3)
            * color_quality;

        // Lab a/b scaled to roughly [-0.5, 0.5].
        let (_, a, b) = rgb_to_lab(rgb);
        let (a, b) = (a / 255.0, b / 255.0);
        let chlorophyll = if a < -0.02 && b > -0.1 && b < 0.15 { a.abs() * 2.0 } else { 0.0 };

        let r = rgb[0] as f32 / 255.0;
        let g = rgb[1] as f32 / 255.0;
        let bl = rgb[2] as f32 / 255.0;
        let ndvi = if g + r > 0.0 { (g - r) / (g + r + 1e-6) } else { 0.0 };
        let ndvi = if ndvi > 0.1 { ndvi } else { 0.0 };
        let excess_green = 2.0 * g - r - bl;
        let excess_green = if excess_green > 0.05 { excess_green } else { 0.0 };

        let score = green * 0.35 + chlorophyll * 0.25 + ndvi * 0.25 + excess_green * 0.15;
        Luma([score.clamp(0.0, 1.0)])
    })
}

/// Per-pixel certainty that the pixel is not vegetation, in [0, 1].
pub fn exclusion_score(image: &RgbImage) -> FloatImage {
    let gray = imaging::to_gray(image);
    let lap = imaging::laplacian(&imaging::to_float(&gray));
    let lap_abs = FloatImage::from_fn(lap.width(), lap.height(), |x, y| Luma([lap.get_pixel(x, y)[0].abs()]));
    let smoothness = imageproc::filter::gaussian_blur_f32(&lap_abs, 2.6);

    FloatImage::from_fn(image.width(), image.height(), |x, y| {
        let rgb = image.get_pixel(x, y).0;
        let (h, s, v) = unit_hsv(rgb);
        let r = rgb[0] as f32 / 255.0;
        let g = rgb[1] as f32 / 255.0;
        let b = rgb[2] as f32 / 255.0;

        let artificial = s > 0.8 && (h < 0.2 || h > 0.5);
        let bright = v > 0.9;
        let dark = v < 0.15;
        let skin = r > g && g > b && r > 0.4 && r < 0.9 && r - g > 0.05 && g - b > 0.02;

        let mut out: f32 = 0.0;
        if artificial || bright || dark || skin {
            out = 1.0;
        }
        if s < 0.15 {
            out = out.max(0.7);
        }
        if smoothness.get_pixel(x, y)[0] < 20.0 {
            out = out.max(0.5);
        }
        Luma([out])
    })
}

/// Per-pixel contextual support for vegetation in [0, 1].
pub fn context_score(image: &RgbImage, texture: &TextureConfig) -> FloatImage {
    let gray = imaging::to_gray(image);
    let gabor = gabor_response(&gray, texture);
    let magnitude = gradient_magnitude(&gray);
    let local_std = imaging::box_variance(&imaging::to_float(&gray), 11);

    FloatImage::from_fn(gray.width(), gray.height(), |x, y| {
        let gb = gabor.get_pixel(x, y)[0] / 255.0;
        let texture_score = if gb > 0.1 && gb < 0.6 { gb } else { gb * 0.3 };

        let gm = magnitude.get_pixel(x, y)[0] / 255.0;
        let gradient_score = if gm > 0.05 && gm < 0.4 { gm * 2.0 } else { gm * 0.5 };

        let consistency = 1.0 / (1.0 + local_std.get_pixel(x, y)[0].sqrt() / 50.0);

        Luma([(texture_score * 0.4 + gradient_score * 0.35 + consistency * 0.25).clamp(0.0, 1.0)])
    })
}

/// Probability map of the analytic model.
pub fn simulate_probability(image: &RgbImage, texture: &TextureConfig) -> ProbabilityMap {
    let vegetation = vegetation_score(image);
    let context = context_score(image, texture);
    let exclusion = exclusion_score(image);

    let combined = FloatImage::from_fn(image.width(), image.height(), |x, y| {
        let v = vegetation.get_pixel(x, y)[0] * context.get_pixel(x, y)[0];
        Luma([v * (1.0 - exclusion.get_pixel(x, y)[0])])
    });
    let smoothed = imageproc::filter::gaussian_blur_f32(&combined, SMOOTHING_SIGMA);
    ProbabilityMap::from_fn(image.width(), image.height(), |x, y| {
        let v = smoothed.get_pixel(x, y)[0];
        Luma([1.0 / (1.0 + (-SIGMOID_GAIN * (v - SIGMOID_CENTER)).exp())])
    })
}

/// Mean of four per-pixel confidence cues: prediction certainty, local
/// consistency of the prediction, vegetation-like color, moderate texture.
pub fn simulation_confidence(probability: &ProbabilityMap, image: &RgbImage) -> ProbabilityMap {
    let local_var = imaging::box_variance(probability, 9);
    let gray = imaging::to_gray(image);
    let lap = imaging::laplacian(&imaging::to_float(&gray));

    ProbabilityMap::from_fn(probability.width(), probability.height(), |x, y| {
        let p = probability.get_pixel(x, y)[0];
        let certainty = 2.0 * (p - 0.5).abs();
        let consistency = 1.0 / (1.0 + local_var.get_pixel(x, y)[0] * 10.0);

        let (h, s, v) = unit_hsv(image.get_pixel(x, y).0);
        let color = if h > 0.25 && h < 0.5 && s > 0.3 && v > 0.2 && v < 0.8 { 0.8 + 0.2 * s } else { 0.3 };

        let strength = lap.get_pixel(x, y)[0].abs() / 255.0;
        let texture = if strength > 0.1 && strength < 0.5 { 0.7 + 0.3 * strength } else { 0.4 };

        Luma([((certainty + consistency + color + texture) / 4.0).clamp(0.0, 1.0)])
    })
}

/// Confidence for an arbitrary probability map: low local variance or an
/// extreme value both count as confident.
pub fn prediction_confidence(probability: &ProbabilityMap) -> ProbabilityMap {
    let local_var = imaging::box_variance(probability, 7);
    ProbabilityMap::from_fn(probability.width(), probability.height(), |x, y| {
        let p = probability.get_pixel(x, y)[0];
        let smooth = 1.0 - (local_var.get_pixel(x, y)[0] * 10.0).clamp(0.0, 1.0);
        Luma([smooth.max(2.0 * (p - 0.5).abs())])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_vegetation_prefers_green() {
        let img = RgbImage::from_fn(2, 1, |x, _| if x == 0 { Rgb([60, 140, 40]) } else { Rgb([200, 60, 60]) });
        let v = vegetation_score(&img);
        assert!(v.get_pixel(0, 0)[0] > 0.2);
        assert_eq!(v.get_pixel(1, 0)[0], 0.0);
    }

    #[test]
    fn test_exclusion_gray_and_glare() {
        let img = RgbImage::from_fn(30, 30, |x, _| if x < 15 { Rgb([128, 128, 128]) } else { Rgb([250, 250, 250]) });
        let e = exclusion_score(&img);
        assert!(e.get_pixel(5, 5)[0] >= 0.7);
        assert_eq!(e.get_pixel(25, 5)[0], 1.0);
    }

    #[test]
    fn test_simulation_is_deterministic_and_bounded() {
        let img = RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 5) as u8, (100 + y * 3) as u8, 40]));
        let texture = TextureConfig::default();
        let a = simulate_probability(&img, &texture);
        let b = simulate_probability(&img, &texture);
        assert_eq!(a, b);
        assert!(a.as_raw().iter().all(|&p| (0.0..=1.0).contains(&p)));
        let conf = simulation_confidence(&a, &img);
        assert!(conf.as_raw().iter().all(|&c| (0.0..=1.0).contains(&c)));
    }

    #[test]
    fn test_prediction_confidence_extremes() {
        let map = ProbabilityMap::from_pixel(10, 10, Luma([1.0]));
        assert!(prediction_confidence(&map).as_raw().iter().all(|&c| (c - 1.0).abs() < 1e-6));
    }
}
