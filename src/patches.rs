// Spatial patch extraction around every pixel

use std::collections::BTreeMap;
use std::time::Instant;

use log::{debug, info};
use ndarray::{s, Array1, Array2, Array3, Array4, Axis};

use crate::config::validate_window_size;
use crate::error::{DatasetError, Result, Stage};

/// Index-aligned patches and labels.
///
/// `data` has shape (n_patches, window, window, n_components) and `labels[i]` belongs
/// to `data[i]`. Any reordering goes through [`PatchSet::select`] so both arrays
/// always move together.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchSet {
    pub data: Array4<f64>,
    pub labels: Array1<u32>,
}

impl PatchSet {
    pub fn new(data: Array4<f64>, labels: Array1<u32>) -> Result<Self> {
        if data.len_of(Axis(0)) != labels.len() {
            return Err(DatasetError::invalid_dimension(
                Stage::PatchExtractor,
                format!(
                    "{} patches but {} labels",
                    data.len_of(Axis(0)),
                    labels.len()
                ),
            ));
        }
        Ok(PatchSet { data, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn num_components(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    /// New set holding `indices` in the given order; repeats are allowed.
    pub fn select(&self, indices: &[usize]) -> PatchSet {
        PatchSet {
            data: self.data.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }

    /// Number of patches per label, ascending by label.
    pub fn class_counts(&self) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for &label in self.labels.iter() {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }

    /// Indices of the patches carrying each label, ascending by label and in input
    /// order within a label.
    pub fn indices_by_class(&self) -> BTreeMap<u32, Vec<usize>> {
        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, &label) in self.labels.iter().enumerate() {
            groups.entry(label).or_default().push(i);
        }
        groups
    }
}

/// Surrounds the spatial axes of `cube` with `margin` zero-valued pixels on every side.
pub fn pad_with_zeros(cube: &Array3<f64>, margin: usize) -> Array3<f64> {
    let (height, width, channels) = cube.dim();
    let mut padded = Array3::zeros((height + 2 * margin, width + 2 * margin, channels));
    padded
        .slice_mut(s![margin..margin + height, margin..margin + width, ..])
        .assign(cube);
    padded
}

/// Extracts a `window_size` x `window_size` neighborhood around every pixel of `cube`.
///
/// Pixels are visited in row-major order and each patch is paired with
/// `label_map[[r, c]]`. With `remove_zero_labels`, background patches (label 0) are
/// dropped and the remaining labels are shifted down by one so classes start at 0.
///
/// # Errors
/// - `InvalidParameter` if `window_size` is even or zero.
/// - `InvalidDimension` if `label_map` does not match the spatial shape of `cube`.
pub fn create_patches(
    cube: &Array3<f64>,
    label_map: &Array2<u32>,
    window_size: usize,
    remove_zero_labels: bool,
) -> Result<PatchSet> {
    validate_window_size(Stage::PatchExtractor, window_size)?;
    let (height, width, channels) = cube.dim();
    if label_map.dim() != (height, width) {
        return Err(DatasetError::invalid_dimension(
            Stage::PatchExtractor,
            format!(
                "label map is {:?} but the cube is {}x{}",
                label_map.dim(),
                height,
                width
            ),
        ));
    }

    let start = Instant::now();
    let margin = (window_size - 1) / 2;
    let padded = pad_with_zeros(cube, margin);

    let mut data = Array4::<f64>::zeros((height * width, window_size, window_size, channels));
    let mut labels = Array1::<u32>::zeros(height * width);
    let mut patch_index = 0;
    for r in 0..height {
        for c in 0..width {
            // Padded (r, c) is the top-left corner of the window centered on original (r, c).
            data.slice_mut(s![patch_index, .., .., ..])
                .assign(&padded.slice(s![r..r + window_size, c..c + window_size, ..]));
            labels[patch_index] = label_map[[r, c]];
            patch_index += 1;
        }
    }
    debug!(
        "Patch extractor: {} dense patches of {}x{}x{} in {:?}",
        patch_index,
        window_size,
        window_size,
        channels,
        start.elapsed()
    );

    let patches = if remove_zero_labels {
        let keep: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label > 0)
            .map(|(i, _)| i)
            .collect();
        let dense = PatchSet { data, labels };
        let mut labeled = dense.select(&keep);
        labeled.labels.mapv_inplace(|label| label - 1);
        labeled
    } else {
        PatchSet { data, labels }
    };

    info!(
        "Patch extractor: {} of {} pixels kept, {} classes, window {}",
        patches.len(),
        height * width,
        patches.class_counts().len(),
        window_size
    );
    Ok(patches)
}
