// src/adaptive/synthetic.rs
//
// Seeded synthetic examples used to bootstrap an empty knowledge base:
// organic green patches (positive) and flat artificial green shapes
// (negative).

use crate::mask::Mask;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const EXAMPLE_SIZE: u32 = 200;
const EXAMPLES_PER_CLASS: usize = 3;
const ORGANIC_SMOOTHING: f32 = 1.5;

pub struct SyntheticExample {
    pub image: RgbImage,
    pub mask: Mask,
    pub is_positive: bool,
}

/// Three vegetation and three artificial examples, deterministic for a
/// given seed.
pub fn training_examples(seed: u64) -> Vec<SyntheticExample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(EXAMPLES_PER_CLASS * 2);
    for _ in 0..EXAMPLES_PER_CLASS {
        out.push(vegetation_example(&mut rng));
    }
    for _ in 0..EXAMPLES_PER_CLASS {
        out.push(artificial_example());
    }
    out
}

/// Noisy natural green, smoothed to look organic. The whole frame is
/// labelled.
pub fn vegetation_example(rng: &mut StdRng) -> SyntheticExample {
    let image = RgbImage::from_fn(EXAMPLE_SIZE, EXAMPLE_SIZE, |_, _| {
        let base: i32 = 70 + rng.gen_range(-20..20);
        let r = (base - 15 + rng.gen_range(-10..10)).max(20);
        let g = ((base as f32 * 2.5) as i32 + rng.gen_range(-30..30)).max(40);
        let b = (base - 30 + rng.gen_range(-15..15)).max(20);
        let noise = |v: i32, rng: &mut StdRng| (v + rng.gen_range(-15..=15)).clamp(0, 255) as u8;
        Rgb([noise(r, rng), noise(g, rng), noise(b, rng)])
    });
    SyntheticExample {
        image: imageproc::filter::gaussian_blur_f32(&image, ORGANIC_SMOOTHING),
        mask: Mask::from_fn(EXAMPLE_SIZE, EXAMPLE_SIZE, |_, _| true),
        is_positive: true,
    }
}

/// Uniform artificial green with a square and a disc on top. The shapes are
/// labelled.
pub fn artificial_example() -> SyntheticExample {
    let in_square = |x: u32, y: u32| (50..=150).contains(&x) && (50..=150).contains(&y);
    let in_disc = |x: u32, y: u32| {
        let dx = x as i64 - 100;
        let dy = y as i64 - 100;
        dx * dx + dy * dy <= 30 * 30
    };
    let image = RgbImage::from_fn(EXAMPLE_SIZE, EXAMPLE_SIZE, |x, y| {
        if in_disc(x, y) {
            Rgb([90, 160, 70])
        } else if in_square(x, y) {
            Rgb([70, 200, 50])
        } else {
            Rgb([80, 180, 60])
        }
    });
    SyntheticExample {
        image,
        mask: Mask::from_fn(EXAMPLE_SIZE, EXAMPLE_SIZE, |x, y| in_square(x, y) || in_disc(x, y)),
        is_positive: false,
    }
}
