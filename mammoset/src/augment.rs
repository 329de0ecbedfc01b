//! Pixel scaling and batch augmentation, applied eagerly to in-memory
//! arrays.

use ndarray::{s, Array, Array1, Array4, Axis, RemoveAxis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Beta, Distribution};

/// Mean pixel value of the training corpus, subtracted when centering.
pub const PIXEL_MEAN: f32 = 104.1353;
/// Divisor applied after centering.
pub const PIXEL_SCALE: f32 = 255.0;

/// Center and scale pixel data, with an optional contrast adjustment about
/// the per-image mean beforehand.
pub fn scale_input(
    images: &Array4<f32>,
    contrast: Option<f32>,
    mu: f32,
    scale: f32,
) -> Array4<f32> {
    let mut adjusted = images.clone();
    if let Some(factor) = contrast {
        for mut image in adjusted.axis_iter_mut(Axis(0)) {
            let mean = image.mean().unwrap_or(0.0);
            image.mapv_inplace(|x| (x - mean) * factor + mean);
        }
    }
    adjusted.mapv_inplace(|x| (x - mu) / scale);
    adjusted
}

/// Convert raw u8 pixels to f32 in [-1, 1].
pub fn normalize_images(images: &Array4<u8>) -> Array4<f32> {
    images.mapv(|b| (b as f32 / 255.0 - 0.5) * 2.0)
}

#[derive(Debug, Clone, Copy)]
pub struct AugmentOptions {
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    /// Mixup coefficient alpha; 0 disables mixup.
    /// See <https://arxiv.org/abs/1710.09412>.
    pub mixup: f32,
    pub seed: Option<u64>,
}

impl Default for AugmentOptions {
    fn default() -> Self {
        Self {
            horizontal_flip: false,
            vertical_flip: false,
            mixup: 0.0,
            seed: None,
        }
    }
}

// Circular shift along the sample axis: the last sample moves to the front.
fn cshift<A: Clone, D: RemoveAxis>(values: &Array<A, D>) -> Array<A, D> {
    let n = values.len_of(Axis(0));
    let mut order = Vec::with_capacity(n);
    order.push(n - 1);
    order.extend(0..n - 1);
    values.select(Axis(0), &order)
}

/// Augment a batch: per-sample coin-flip horizontal/vertical flips, then
/// mixup interpolation pairing each sample with its circular-shift
/// neighbour under a per-sample lambda drawn from Beta(alpha, alpha).
///
/// Labels are float here because mixup produces soft labels.
pub fn augment(
    images: &Array4<f32>,
    labels: &Array1<f32>,
    opts: &AugmentOptions,
) -> (Array4<f32>, Array1<f32>) {
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let batch = images.len_of(Axis(0));
    let mut images = images.clone();
    let mut labels = labels.clone();

    if opts.horizontal_flip {
        for mut image in images.axis_iter_mut(Axis(0)) {
            if rng.gen_bool(0.5) {
                let flipped = image.slice(s![.., ..;-1, ..]).to_owned();
                image.assign(&flipped);
            }
        }
    }

    if opts.vertical_flip {
        for mut image in images.axis_iter_mut(Axis(0)) {
            if rng.gen_bool(0.5) {
                let flipped = image.slice(s![..;-1, .., ..]).to_owned();
                image.assign(&flipped);
            }
        }
    }

    if opts.mixup > 0.0 && batch > 1 {
        let beta = Beta::new(opts.mixup as f64, opts.mixup as f64)
            .expect("mixup coefficient must be positive and finite");
        let lam: Vec<f32> = (0..batch).map(|_| beta.sample(&mut rng) as f32).collect();

        let shifted_images = cshift(&images);
        let shifted_labels = cshift(&labels);

        for (i, mut image) in images.axis_iter_mut(Axis(0)).enumerate() {
            let l = lam[i];
            let partner = shifted_images.index_axis(Axis(0), i);
            image.zip_mut_with(&partner, |a, &b| *a = l * *a + (1.0 - l) * b);
        }
        for (i, label) in labels.iter_mut().enumerate() {
            *label = lam[i] * *label + (1.0 - lam[i]) * shifted_labels[i];
        }
    }

    (images, labels)
}
