// src/imaging.rs
//
// Low-level pixel operations shared by the classifiers, the confidence engine
// and the postprocessor: grayscale statistics, Laplacian, windowed mean and
// variance, percentiles, morphology on masks and connected components.

use crate::mask::Mask;
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter;
use imageproc::morphology;
use imageproc::region_labelling::{connected_components, Connectivity};

pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

// ============================================================================
// STATISTICS
// ============================================================================

pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Population mean and standard deviation.
pub fn mean_std<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in values {
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean, var.sqrt())
}

pub fn gray_mean_std(gray: &GrayImage) -> (f64, f64) {
    mean_std(gray.as_raw().iter().map(|&v| v as f64))
}

pub fn to_float(gray: &GrayImage) -> FloatImage {
    FloatImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([gray.get_pixel(x, y)[0] as f32])
    })
}

const LAPLACIAN_KERNEL: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

/// 4-neighbour Laplacian. Borders are padded by continuity.
pub fn laplacian(image: &FloatImage) -> FloatImage {
    filter::filter3x3::<_, f32, f32>(image, &LAPLACIAN_KERNEL)
}

/// Variance of the Laplacian, used as a focus measure.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    let lap = laplacian(&to_float(gray));
    let (_, std) = mean_std(lap.as_raw().iter().map(|&v| v as f64));
    std * std
}

/// Mean over a `window`×`window` neighbourhood, continuity-padded.
pub fn box_mean(image: &FloatImage, window: u32) -> FloatImage {
    let n = window.max(1) as usize;
    let kernel = vec![1.0f32 / n as f32; n];
    filter::separable_filter_equal(image, &kernel)
}

/// Windowed variance E[x²] − E[x]².
pub fn box_variance(image: &FloatImage, window: u32) -> FloatImage {
    let squares = FloatImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y)[0];
        Luma([v * v])
    });
    let mean = box_mean(image, window);
    let mean_sq = box_mean(&squares, window);
    FloatImage::from_fn(image.width(), image.height(), |x, y| {
        let m = mean.get_pixel(x, y)[0];
        Luma([(mean_sq.get_pixel(x, y)[0] - m * m).max(0.0)])
    })
}

/// Min-max stretch to 0..=255.
pub fn normalize_to_u8(image: &FloatImage) -> GrayImage {
    let (min, max) = image
        .as_raw()
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if range <= f32::EPSILON {
            return Luma([0]);
        }
        let v = (image.get_pixel(x, y)[0] - min) / range * 255.0;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f32], p: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

// ============================================================================
// MORPHOLOGY
// ============================================================================

/// Elliptical structuring element of side `k`: a 3×3 ellipse is the L1 ball,
/// larger ones are approximated by the L∞ ball.
fn structuring(k: u32) -> (Norm, u8) {
    let radius = (k / 2).clamp(1, 255) as u8;
    if k <= 3 {
        (Norm::L1, radius)
    } else {
        (Norm::LInf, radius)
    }
}

pub fn dilate(mask: &Mask, k: u32) -> Mask {
    let (norm, r) = structuring(k);
    Mask::from_gray(morphology::dilate(mask.as_image(), norm, r))
}

pub fn erode(mask: &Mask, k: u32) -> Mask {
    let (norm, r) = structuring(k);
    Mask::from_gray(morphology::erode(mask.as_image(), norm, r))
}

pub fn open(mask: &Mask, k: u32) -> Mask {
    let (norm, r) = structuring(k);
    Mask::from_gray(morphology::open(mask.as_image(), norm, r))
}

pub fn close(mask: &Mask, k: u32) -> Mask {
    let (norm, r) = structuring(k);
    Mask::from_gray(morphology::close(mask.as_image(), norm, r))
}

/// Dilation minus erosion with a 3×3 element.
pub fn morphological_gradient(mask: &Mask) -> GrayImage {
    let d = dilate(mask, 3);
    let e = erode(mask, 3);
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([d.as_image().get_pixel(x, y)[0].saturating_sub(e.as_image().get_pixel(x, y)[0])])
    })
}

// ============================================================================
// CONNECTED COMPONENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    pub label: u32,
    pub area: u64,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Component {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

#[derive(Debug, Clone)]
pub struct Components {
    pub labels: ImageBuffer<Luma<u32>, Vec<u32>>,
    /// Indexed by `label - 1`.
    pub components: Vec<Component>,
}

impl Components {
    pub fn areas(&self) -> Vec<u64> {
        self.components.iter().map(|c| c.area).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Mask made of the components accepted by `keep`.
    pub fn select(&self, keep: impl Fn(&Component) -> bool) -> Mask {
        let kept: Vec<bool> = self.components.iter().map(|c| keep(c)).collect();
        Mask::from_fn(self.labels.width(), self.labels.height(), |x, y| {
            let label = self.labels.get_pixel(x, y)[0];
            label > 0 && kept[(label - 1) as usize]
        })
    }
}

/// 8-connected components of the material pixels.
pub fn components(mask: &Mask) -> Components {
    let labels = connected_components(mask.as_image(), Connectivity::Eight, Luma([0u8]));
    let mut components: Vec<Component> = Vec::new();
    for (x, y, p) in labels.enumerate_pixels() {
        let label = p[0];
        if label == 0 {
            continue;
        }
        let idx = (label - 1) as usize;
        if idx >= components.len() {
            components.resize(
                idx + 1,
                Component {
                    label: 0,
                    area: 0,
                    min_x: u32::MAX,
                    min_y: u32::MAX,
                    max_x: 0,
                    max_y: 0,
                },
            );
        }
        let c = &mut components[idx];
        c.label = label;
        c.area += 1;
        c.min_x = c.min_x.min(x);
        c.min_y = c.min_y.min(y);
        c.max_x = c.max_x.max(x);
        c.max_y = c.max_y.max(y);
    }
    Components { labels, components }
}

pub fn remove_small_components(mask: &Mask, min_area: u64) -> Mask {
    if min_area <= 1 {
        return mask.clone();
    }
    components(mask).select(|c| c.area >= min_area)
}
