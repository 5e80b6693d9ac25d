// src/mask.rs
//
// Binary material/background mask and the per-pixel probability map
// produced by the segmentation adapter.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};

/// Per-pixel probability in [0, 1].
pub type ProbabilityMap = ImageBuffer<Luma<f32>, Vec<f32>>;

pub const MATERIAL: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Binary mask stored as a 0/255 grayscale image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask(GrayImage);

impl Mask {
    pub fn empty(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    /// Any non-zero pixel becomes material.
    pub fn from_gray(image: GrayImage) -> Self {
        let mut image = image;
        for p in image.pixels_mut() {
            p[0] = if p[0] > 0 { MATERIAL } else { BACKGROUND };
        }
        Self(image)
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        Self(GrayImage::from_fn(width, height, |x, y| {
            Luma([if f(x, y) { MATERIAL } else { BACKGROUND }])
        }))
    }

    /// Pixels strictly above `threshold` become material.
    pub fn from_probability(map: &ProbabilityMap, threshold: f32) -> Self {
        Self::from_fn(map.width(), map.height(), |x, y| {
            map.get_pixel(x, y)[0] > threshold
        })
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn into_image(self) -> GrayImage {
        self.0
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y)[0] > 0
    }

    pub fn count(&self) -> u64 {
        self.0.as_raw().iter().filter(|&&v| v > 0).count() as u64
    }

    pub fn total_pixels(&self) -> u64 {
        self.0.width() as u64 * self.0.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_raw().iter().all(|&v| v == 0)
    }

    /// Material fraction in [0, 1].
    pub fn coverage_fraction(&self) -> f64 {
        let total = self.total_pixels();
        if total == 0 {
            return 0.0;
        }
        self.count() as f64 / total as f64
    }

    pub fn coverage_percentage(&self) -> f64 {
        self.coverage_fraction() * 100.0
    }

    pub fn resize_nearest(&self, width: u32, height: u32) -> Mask {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Mask(imageops::resize(&self.0, width, height, FilterType::Nearest))
    }

    pub fn union(&self, other: &Mask) -> Mask {
        self.zip(other, |a, b| a || b)
    }

    pub fn intersection(&self, other: &Mask) -> Mask {
        self.zip(other, |a, b| a && b)
    }

    pub fn difference(&self, other: &Mask) -> Mask {
        self.zip(other, |a, b| a && !b)
    }

    pub fn invert(&self) -> Mask {
        Mask::from_fn(self.width(), self.height(), |x, y| !self.get(x, y))
    }

    /// 1.0 for material, 0.0 for background.
    pub fn to_probability(&self) -> ProbabilityMap {
        ProbabilityMap::from_fn(self.width(), self.height(), |x, y| {
            Luma([if self.get(x, y) { 1.0 } else { 0.0 }])
        })
    }

    fn zip(&self, other: &Mask, op: impl Fn(bool, bool) -> bool) -> Mask {
        let other = other.resize_nearest(self.width(), self.height());
        Mask::from_fn(self.width(), self.height(), |x, y| {
            op(self.get(x, y), other.get(x, y))
        })
    }
}
