// Geometric augmentation of training patches

use std::fmt;

use log::{info, trace};
use ndarray::{s, Array3, Array4, ArrayView3, Axis};
use rand::Rng;

/// Source coordinates this far outside the patch still count as inside, so that
/// rounding in the rotation matrix does not zero out edge pixels.
const EDGE_TOLERANCE: f64 = 1e-6;

/// Rotation angles are drawn from `ROTATION_MIN_DEGREES + k * ROTATION_STEP_DEGREES`.
const ROTATION_MIN_DEGREES: i32 = -180;
const ROTATION_STEP_DEGREES: i32 = 30;
const ROTATION_STEPS: i32 = 12;

/// One geometric transform applied to a whole patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchTransform {
    /// Reverse the row axis.
    FlipVertical,
    /// Reverse the column axis.
    FlipHorizontal,
    /// Rotate about the patch center, counter-clockwise for positive angles.
    Rotate { degrees: i32 },
}

impl PatchTransform {
    /// Draws a transform uniformly from the three kinds; rotations then draw their
    /// angle uniformly from {-180, -150, ..., 150}.
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0..3) {
            0 => PatchTransform::FlipVertical,
            1 => PatchTransform::FlipHorizontal,
            _ => PatchTransform::Rotate {
                degrees: ROTATION_MIN_DEGREES + ROTATION_STEP_DEGREES * rng.gen_range(0..ROTATION_STEPS),
            },
        }
    }

    pub fn apply(&self, patch: ArrayView3<f64>) -> Array3<f64> {
        match *self {
            PatchTransform::FlipVertical => flip_vertical(patch),
            PatchTransform::FlipHorizontal => flip_horizontal(patch),
            PatchTransform::Rotate { degrees } => rotate(patch, degrees as f64),
        }
    }
}

impl fmt::Display for PatchTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchTransform::FlipVertical => write!(f, "vertical flip"),
            PatchTransform::FlipHorizontal => write!(f, "horizontal flip"),
            PatchTransform::Rotate { degrees } => write!(f, "rotation by {} degrees", degrees),
        }
    }
}

/// How many patches received each kind of transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AugmentationSummary {
    pub vertical_flips: usize,
    pub horizontal_flips: usize,
    pub rotations: usize,
}

impl AugmentationSummary {
    pub fn total(&self) -> usize {
        self.vertical_flips + self.horizontal_flips + self.rotations
    }

    fn record(&mut self, transform: PatchTransform) {
        match transform {
            PatchTransform::FlipVertical => self.vertical_flips += 1,
            PatchTransform::FlipHorizontal => self.horizontal_flips += 1,
            PatchTransform::Rotate { .. } => self.rotations += 1,
        }
    }
}

pub fn flip_vertical(patch: ArrayView3<f64>) -> Array3<f64> {
    patch.slice(s![..;-1, .., ..]).to_owned()
}

pub fn flip_horizontal(patch: ArrayView3<f64>) -> Array3<f64> {
    patch.slice(s![.., ..;-1, ..]).to_owned()
}

/// Cubic B-spline basis function.
fn cubic_bspline(x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 {
        2.0 / 3.0 - x * x + x * x * x / 2.0
    } else if x < 2.0 {
        let t = 2.0 - x;
        t * t * t / 6.0
    } else {
        0.0
    }
}

/// Reflects an out-of-range tap about the edge samples: -1 -> 1, len -> len - 2.
fn mirror_index(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let folded = index.rem_euclid(period);
    if folded >= len as isize {
        (period - folded) as usize
    } else {
        folded as usize
    }
}

/// Rotates every channel of `patch` (rows, cols, channels) about its center.
///
/// The output keeps the input shape. Each output pixel samples the input with a
/// cubic B-spline kernel (no prefiltering, so values are lightly smoothed); taps
/// that fall past the edge are mirrored. Output pixels whose source position lies
/// outside the input extent are set to 0.
pub fn rotate(patch: ArrayView3<f64>, degrees: f64) -> Array3<f64> {
    let (height, width, channels) = patch.dim();
    let (sin, cos) = degrees.to_radians().sin_cos();
    let center_r = (height as f64 - 1.0) / 2.0;
    let center_c = (width as f64 - 1.0) / 2.0;
    let max_r = height as f64 - 1.0;
    let max_c = width as f64 - 1.0;

    let mut rotated = Array3::<f64>::zeros(patch.raw_dim());
    for r in 0..height {
        for c in 0..width {
            let dr = r as f64 - center_r;
            let dc = c as f64 - center_c;
            let src_r = center_r + cos * dr + sin * dc;
            let src_c = center_c - sin * dr + cos * dc;
            if src_r < -EDGE_TOLERANCE
                || src_r > max_r + EDGE_TOLERANCE
                || src_c < -EDGE_TOLERANCE
                || src_c > max_c + EDGE_TOLERANCE
            {
                continue;
            }

            let base_r = src_r.floor() as isize;
            let base_c = src_c.floor() as isize;
            for tap_r in base_r - 1..=base_r + 2 {
                let weight_r = cubic_bspline(src_r - tap_r as f64);
                if weight_r == 0.0 {
                    continue;
                }
                let in_r = mirror_index(tap_r, height);
                for tap_c in base_c - 1..=base_c + 2 {
                    let weight = weight_r * cubic_bspline(src_c - tap_c as f64);
                    if weight == 0.0 {
                        continue;
                    }
                    let in_c = mirror_index(tap_c, width);
                    for k in 0..channels {
                        rotated[[r, c, k]] += weight * patch[[in_r, in_c, k]];
                    }
                }
            }
        }
    }
    rotated
}

/// Applies one random transform to each patch in the first half of `data`.
///
/// `data` has shape (n, rows, cols, channels). Patches `0..n/2` are each replaced by
/// their own transformed copy; patches from `n/2` on and any labels are left alone.
pub fn augment_patches<R: Rng + ?Sized>(data: &mut Array4<f64>, rng: &mut R) -> AugmentationSummary {
    let n_patches = data.len_of(Axis(0));
    let prefix = n_patches / 2;
    let mut summary = AugmentationSummary::default();

    for i in 0..prefix {
        let transform = PatchTransform::draw(rng);
        let transformed = transform.apply(data.index_axis(Axis(0), i));
        data.index_axis_mut(Axis(0), i).assign(&transformed);
        trace!("Augmenter: patch {} <- {}", i, transform);
        summary.record(transform);
    }

    info!(
        "Augmenter: transformed {} of {} patches ({} vertical flips, {} horizontal flips, {} rotations)",
        summary.total(),
        n_patches,
        summary.vertical_flips,
        summary.horizontal_flips,
        summary.rotations
    );
    summary
}
