// src/adaptive/features.rs
//
// Feature vector describing a labelled region: color moments in RGB and
// HSV, grayscale texture moments, and the shape of the largest outer contour.

use crate::color_analysis::rgb_to_hsv8;
use crate::imaging;
use crate::mask::Mask;
use image::RgbImage;
use imageproc::contours::{find_contours, BorderType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub mean_rgb: [f64; 3],
    pub std_rgb: [f64; 3],
    /// Hue on the 0..180 scale, saturation and value on 0..255.
    pub mean_hsv: [f64; 3],
    pub std_hsv: [f64; 3],
    pub texture_variance: f64,
    pub texture_mean: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeFeatures>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeFeatures {
    pub area: f64,
    pub perimeter: f64,
    /// `area / perimeter²`, 0 for a degenerate contour.
    pub compactness: f64,
}

impl FeatureVector {
    /// Hue as a fraction of the full circle.
    pub fn normalized_hue(&self) -> f64 {
        self.mean_hsv[0] / 180.0
    }

    pub fn color_variation(&self) -> f64 {
        self.std_hsv.iter().sum::<f64>() / 3.0
    }
}

/// Running per-channel first and second moments.
#[derive(Default)]
struct Moments {
    n: f64,
    sum: [f64; 3],
    sum_sq: [f64; 3],
}

impl Moments {
    fn push(&mut self, v: [u8; 3]) {
        self.n += 1.0;
        for c in 0..3 {
            let x = v[c] as f64;
            self.sum[c] += x;
            self.sum_sq[c] += x * x;
        }
    }

    fn finish(&self) -> ([f64; 3], [f64; 3]) {
        let mut mean = [0.0; 3];
        let mut std = [0.0; 3];
        if self.n == 0.0 {
            return (mean, std);
        }
        for c in 0..3 {
            mean[c] = self.sum[c] / self.n;
            std[c] = (self.sum_sq[c] / self.n - mean[c] * mean[c]).max(0.0).sqrt();
        }
        (mean, std)
    }
}

/// Features of the masked region, or of the whole image when `mask` is
/// empty. `None` for an empty image or a mask of different dimensions.
pub fn extract(image: &RgbImage, mask: &Mask) -> Option<FeatureVector> {
    if image.width() == 0 || image.height() == 0 || mask.dimensions() != image.dimensions() {
        return None;
    }
    let whole = mask.is_empty();
    let gray = imaging::to_gray(image);

    let mut rgb = Moments::default();
    let mut hsv = Moments::default();
    let mut gray_values = Vec::new();
    for (x, y, p) in image.enumerate_pixels() {
        if !whole && !mask.get(x, y) {
            continue;
        }
        rgb.push(p.0);
        hsv.push(rgb_to_hsv8(p.0));
        gray_values.push(gray.get_pixel(x, y)[0] as f64);
    }
    let (mean_rgb, std_rgb) = rgb.finish();
    let (mean_hsv, std_hsv) = hsv.finish();
    let (texture_mean, texture_std) = imaging::mean_std(gray_values);

    Some(FeatureVector {
        mean_rgb,
        std_rgb,
        mean_hsv,
        std_hsv,
        texture_variance: texture_std * texture_std,
        texture_mean,
        shape: if whole { None } else { largest_contour_shape(mask) },
    })
}

/// Area and perimeter of the largest outer contour (polygon area via the
/// shoelace formula, closed polyline length).
fn largest_contour_shape(mask: &Mask) -> Option<ShapeFeatures> {
    find_contours::<i32>(mask.as_image())
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .map(|c| {
            let n = c.points.len();
            let mut twice_area = 0.0f64;
            let mut perimeter = 0.0f64;
            for i in 0..n {
                let p = c.points[i];
                let q = c.points[(i + 1) % n];
                twice_area += p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
                perimeter += (((q.x - p.x).pow(2) + (q.y - p.y).pow(2)) as f64).sqrt();
            }
            let area = twice_area.abs() / 2.0;
            ShapeFeatures {
                area,
                perimeter,
                compactness: if perimeter > 0.0 { area / (perimeter * perimeter) } else { 0.0 },
            }
        })
        .max_by(|a, b| a.area.total_cmp(&b.area))
}

/// `1 / (1 + ‖Δ mean_hsv‖ / 100)`.
pub fn color_similarity(a: &FeatureVector, b: &FeatureVector) -> f64 {
    let d: f64 = (0..3).map(|c| (a.mean_hsv[c] - b.mean_hsv[c]).powi(2)).sum::<f64>().sqrt();
    1.0 / (1.0 + d / 100.0)
}

/// `1 / (1 + |Δ texture_variance| / 1000)`.
pub fn texture_similarity(a: &FeatureVector, b: &FeatureVector) -> f64 {
    1.0 / (1.0 + (a.texture_variance - b.texture_variance).abs() / 1000.0)
}

pub fn similarity(a: &FeatureVector, b: &FeatureVector) -> f64 {
    (color_similarity(a, b) + texture_similarity(a, b)) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_uniform_region() {
        let img = RgbImage::from_pixel(10, 10, Rgb([0, 255, 0]));
        let f = extract(&img, &Mask::empty(10, 10)).unwrap();
        assert_eq!(f.mean_rgb, [0.0, 255.0, 0.0]);
        assert_eq!(f.std_rgb, [0.0, 0.0, 0.0]);
        assert!((f.mean_hsv[0] - 60.0).abs() < 1.0);
        assert_eq!(f.texture_variance, 0.0);
        assert!(f.shape.is_none());
    }

    #[test]
    fn test_masked_region_and_shape() {
        let img = RgbImage::from_fn(40, 40, |x, _| if x < 20 { Rgb([10, 200, 10]) } else { Rgb([200, 10, 10]) });
        let mask = Mask::from_fn(40, 40, |x, y| (5..15).contains(&x) && (5..15).contains(&y));
        let f = extract(&img, &mask).unwrap();
        assert_eq!(f.mean_rgb, [10.0, 200.0, 10.0]);
        let shape = f.shape.unwrap();
        assert!(shape.area > 60.0 && shape.area <= 100.0, "{}", shape.area);
        assert!(shape.compactness > 0.0 && shape.compactness < 0.1);
    }

    #[test]
    fn test_mismatched_mask() {
        let img = RgbImage::new(4, 4);
        assert!(extract(&img, &Mask::empty(3, 3)).is_none());
    }

    #[test]
    fn test_similarity_bounds() {
        let img = RgbImage::from_pixel(4, 4, Rgb([30, 150, 40]));
        let f = extract(&img, &Mask::empty(4, 4)).unwrap();
        assert!((similarity(&f, &f) - 1.0).abs() < 1e-12);
        let other = RgbImage::from_fn(4, 4, |x, _| Rgb([(x * 60) as u8, 0, 200]));
        let g = extract(&other, &Mask::empty(4, 4)).unwrap();
        let s = similarity(&f, &g);
        assert!(s > 0.0 && s < 1.0);
    }
}
