// src/analysis/postprocess.rs
//
// Mask cleanup after fusion.
//
// Standard:   close(5) → open(5) → drop components < 1000 px
// Precision:  for i in 0..N: close(3+2i) → open(3+2i)
//             → watershed separation (only when coverage > 0.8)
//             → drop components < min_region_area
//             → [outlier rejection]
//             → color-guided edge refinement (adds pixels only)

use crate::color_analysis::{HsvImage, GREEN};
use crate::imaging::{self, Components};
use crate::mask::{Mask, BACKGROUND, MATERIAL};
use crate::mode::ModeProfile;
use crate::types::PrecisionConfig;
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use imageproc::edges::canny;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

const STANDARD_KERNEL: u32 = 5;
const STANDARD_MIN_AREA: u64 = 1000;

/// Seeds are the pixels farther from the background than this share of the
/// maximum distance.
const SEED_DISTANCE_RATIO: f64 = 0.4;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const REFINEMENT_RING: u32 = 5;

const OUTLIER_SIGMAS: f64 = 2.0;
const MIN_ASPECT: f64 = 0.1;
const MAX_ASPECT: f64 = 10.0;

pub fn standard(mask: &Mask) -> Mask {
    let cleaned = imaging::open(&imaging::close(mask, STANDARD_KERNEL), STANDARD_KERNEL);
    imaging::remove_small_components(&cleaned, STANDARD_MIN_AREA)
}

/// # Arguments
/// * `mask` - Fused mask
/// * `image` - Image the mask was computed on (edge refinement)
/// * `profile` - Active mode profile
/// * `config` - Precision thresholds
/// * `outlier_min_area` - Minimum area for components surviving outlier rejection
pub fn precision(
    mask: &Mask,
    image: &RgbImage,
    profile: &ModeProfile,
    config: &PrecisionConfig,
    outlier_min_area: u64,
) -> Mask {
    let mut out = mask.clone();
    for i in 0..profile.morphology_iterations {
        let k = 3 + 2 * i;
        out = imaging::open(&imaging::close(&out, k), k);
    }

    if profile.watershed && out.coverage_fraction() > config.watershed_coverage {
        out = watershed_separation(&out);
    }

    out = imaging::remove_small_components(&out, config.min_region_area as u64);

    if profile.outlier_rejection {
        out = remove_outliers(&out, outlier_min_area);
    }

    if profile.edge_refinement {
        out = refine_edges_with_color(&out, image);
    }
    out
}

// ============================================================================
// WATERSHED
// ============================================================================

/// Distance from every mask pixel to the nearest background pixel, the
/// image border counting as background.
fn distance_to_background(mask: &Mask) -> Vec<f64> {
    let (w, h) = mask.dimensions();
    // One-pixel background frame; the transform measures distance to
    // nonzero pixels so background is encoded as nonzero.
    let padded = GrayImage::from_fn(w + 2, h + 2, |x, y| {
        let inside = x >= 1 && y >= 1 && x <= w && y <= h;
        if inside && mask.get(x - 1, y - 1) {
            Luma([BACKGROUND])
        } else {
            Luma([MATERIAL])
        }
    });
    let dist = euclidean_squared_distance_transform(&padded);
    let mut out = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            out.push(dist.get_pixel(x + 1, y + 1)[0].sqrt());
        }
    }
    out
}

/// Split touching regions. Seeds are the connected cores far from the
/// background; they are flooded inside the mask in order of the mask's
/// morphological gradient and pixels where two floods meet are removed.
/// Returns the mask unchanged when fewer than two seeds exist.
pub fn watershed_separation(mask: &Mask) -> Mask {
    let (w, h) = mask.dimensions();
    if mask.is_empty() {
        return mask.clone();
    }
    let dist = distance_to_background(mask);
    let max = dist.iter().copied().fold(0.0f64, f64::max);
    let seeds = Mask::from_fn(w, h, |x, y| dist[(y * w + x) as usize] > SEED_DISTANCE_RATIO * max);
    let markers = imaging::components(&seeds);
    if markers.len() < 2 {
        debug!("💧 Watershed: {} seed(s), mask unchanged", markers.len());
        return mask.clone();
    }

    let boundaries = flood(mask, &markers);
    let removed = boundaries.iter().filter(|&&b| b).count();
    debug!("💧 Watershed: {} seeds, {} boundary pixels removed", markers.len(), removed);
    Mask::from_fn(w, h, |x, y| mask.get(x, y) && !boundaries[(y * w + x) as usize])
}

const UNLABELED: i64 = 0;
const BOUNDARY: i64 = -1;

/// Priority flood restricted to mask pixels. Returns the boundary flags.
fn flood(mask: &Mask, markers: &Components) -> Vec<bool> {
    let (w, h) = mask.dimensions();
    let gradient = imaging::morphological_gradient(mask);
    let n = (w * h) as usize;
    let mut labels = vec![UNLABELED; n];
    let mut queued = vec![false; n];
    let mut heap: BinaryHeap<Reverse<(u8, u64, usize)>> = BinaryHeap::new();
    let mut seq = 0u64;

    for (x, y, p) in markers.labels.enumerate_pixels() {
        if p[0] > 0 {
            labels[(y * w + x) as usize] = p[0] as i64;
        }
    }

    let neighbors = |idx: usize| {
        let x = (idx as u32) % w;
        let y = (idx as u32) / w;
        let mut out = [None; 4];
        if x > 0 {
            out[0] = Some(idx - 1);
        }
        if x + 1 < w {
            out[1] = Some(idx + 1);
        }
        if y > 0 {
            out[2] = Some(idx - w as usize);
        }
        if y + 1 < h {
            out[3] = Some(idx + w as usize);
        }
        out
    };
    let in_mask = |idx: usize| mask.get((idx as u32) % w, (idx as u32) / w);
    let level = |idx: usize| gradient.get_pixel((idx as u32) % w, (idx as u32) / w)[0];

    for idx in 0..n {
        if labels[idx] <= 0 {
            continue;
        }
        for nb in neighbors(idx).into_iter().flatten() {
            if in_mask(nb) && labels[nb] == UNLABELED && !queued[nb] {
                queued[nb] = true;
                heap.push(Reverse((level(nb), seq, nb)));
                seq += 1;
            }
        }
    }

    while let Some(Reverse((_, _, idx))) = heap.pop() {
        let mut label = UNLABELED;
        let mut conflict = false;
        for nb in neighbors(idx).into_iter().flatten() {
            let l = labels[nb];
            if l > 0 {
                if label == UNLABELED {
                    label = l;
                } else if label != l {
                    conflict = true;
                }
            }
        }
        if conflict || label == UNLABELED {
            labels[idx] = BOUNDARY;
            continue;
        }
        labels[idx] = label;
        for nb in neighbors(idx).into_iter().flatten() {
            if in_mask(nb) && labels[nb] == UNLABELED && !queued[nb] {
                queued[nb] = true;
                heap.push(Reverse((level(nb), seq, nb)));
                seq += 1;
            }
        }
    }

    labels.iter().map(|&l| l == BOUNDARY).collect()
}

// ============================================================================
// OUTLIERS / EDGE REFINEMENT
// ============================================================================

/// Keep components whose area lies within 2σ of the mean area, is at least
/// `min_area`, and whose bounding box aspect ratio is in [0.1, 10].
pub fn remove_outliers(mask: &Mask, min_area: u64) -> Mask {
    let components = imaging::components(mask);
    if components.is_empty() {
        return mask.clone();
    }
    let (mean, std) = imaging::mean_std(components.areas().iter().map(|&a| a as f64));
    components.select(|c| {
        let area = c.area as f64;
        let aspect = c.width() as f64 / c.height() as f64;
        (area - mean).abs() <= OUTLIER_SIGMAS * std
            && c.area >= min_area
            && (MIN_ASPECT..=MAX_ASPECT).contains(&aspect)
    })
}

/// OR in green-band pixels lying in a ring around the mask's edges.
/// Never removes pixels.
pub fn refine_edges_with_color(mask: &Mask, image: &RgbImage) -> Mask {
    if mask.is_empty() || mask.dimensions() != image.dimensions() {
        return mask.clone();
    }
    let edges = Mask::from_gray(canny(mask.as_image(), CANNY_LOW, CANNY_HIGH));
    let ring = imaging::dilate(&edges, REFINEMENT_RING);
    let green = HsvImage::from_rgb(image).in_band(&GREEN);
    let added = green.intersection(&ring);
    mask.union(&added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Config, Mode};
    use image::Rgb;

    #[test]
    fn test_standard_drops_small_regions() {
        let mask = Mask::from_fn(100, 100, |x, y| (x < 50 && y < 50) || (x > 90 && y > 90));
        let out = standard(&mask);
        assert!(out.get(20, 20));
        assert!(!out.get(95, 95));
    }

    #[test]
    fn test_watershed_splits_touching_squares() {
        // Two 30×30 squares joined by a thin bridge.
        let mask = Mask::from_fn(80, 40, |x, y| {
            (5..35).contains(&x) && (5..35).contains(&y)
                || (45..75).contains(&x) && (5..35).contains(&y)
                || (35..45).contains(&x) && (18..22).contains(&y)
        });
        let out = watershed_separation(&mask);
        assert!(out.count() < mask.count());
        assert_eq!(out.difference(&mask).count(), 0);
        assert!(out.get(20, 20) && out.get(60, 20));
    }

    #[test]
    fn test_watershed_single_seed_unchanged() {
        let mask = Mask::from_fn(40, 40, |x, y| (5..35).contains(&x) && (5..35).contains(&y));
        assert_eq!(watershed_separation(&mask), mask);
        let empty = Mask::empty(10, 10);
        assert_eq!(watershed_separation(&empty), empty);
    }

    #[test]
    fn test_outliers_reject_thin_strip() {
        let mask = Mask::from_fn(200, 100, |x, y| {
            (10..40).contains(&x) && (10..40).contains(&y) || (60..190).contains(&x) && (80..82).contains(&y)
        });
        let out = remove_outliers(&mask, 10);
        assert!(out.get(20, 20));
        assert!(!out.get(100, 80));
    }

    #[test]
    fn test_edge_refinement_only_adds() {
        let img = RgbImage::from_fn(60, 60, |x, _| if x < 40 { Rgb([40, 160, 40]) } else { Rgb([120, 120, 120]) });
        let mask = Mask::from_fn(60, 60, |x, _| x < 30);
        let out = refine_edges_with_color(&mask, &img);
        assert_eq!(mask.difference(&out).count(), 0);
        assert!(out.get(31, 30));
        assert!(!out.get(50, 30));
    }

    #[test]
    fn test_precision_keeps_large_block() {
        let config = Config::default();
        let profile = ModeProfile::for_mode(Mode::Precision, &config);
        let img = RgbImage::from_pixel(100, 100, Rgb([120, 120, 120]));
        let mask = Mask::from_fn(100, 100, |x, y| (20..80).contains(&x) && (20..80).contains(&y));
        let out = precision(&mask, &img, &profile, &config.precision, 1000);
        assert!(out.get(50, 50));
        assert_eq!(out.dimensions(), (100, 100));
    }
}
