// End-to-end dataset generation

use std::borrow::Cow;
use std::time::Instant;

use log::{info, warn};
use ndarray::{Array2, Array3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::augment::{augment_patches, AugmentationSummary};
use crate::balance::oversample_weak_classes;
use crate::config::DatasetConfig;
use crate::error::Result;
use crate::io::{artifact_name, basis_file_name, ArraySink, ArraySource, ArtifactKind};
use crate::patches::{create_patches, PatchSet};
use crate::reduce::{reduce_cube, ProjectionBasis, ReducerOptions};
use crate::split::{stratified_split, Split};

/// What to load from an [`ArraySource`] and what to hand to an [`ArraySink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetRequest {
    pub cube_key: String,
    pub labels_key: String,
    /// Stage the fitted projection basis alongside the four arrays.
    pub save_basis: bool,
}

impl Default for DatasetRequest {
    fn default() -> Self {
        DatasetRequest {
            cube_key: "Indian_pines_corrected".to_string(),
            labels_key: "Indian_pines_gt".to_string(),
            save_basis: false,
        }
    }
}

/// Output of [`prepare_dataset`].
#[derive(Clone, Debug)]
pub struct PreparedDataset {
    /// Balanced and augmented train patches.
    pub train: PatchSet,
    /// Test patches, untouched after the split.
    pub test: PatchSet,
    /// Fitted projection; `None` when the reducer is disabled.
    pub basis: Option<ProjectionBasis>,
    pub augmentation: AugmentationSummary,
}

/// Runs reducer, patch extractor, splitter, class balancer and augmenter on an
/// in-memory cube.
///
/// Each randomized stage draws from its own ChaCha8 stream seeded from `config`, so
/// the output depends only on the inputs and the three seeds.
pub fn prepare_dataset(
    cube: &Array3<f64>,
    label_map: &Array2<u32>,
    config: &DatasetConfig,
) -> Result<PreparedDataset> {
    config.validate()?;
    prepare_validated(cube, label_map, config)
}

fn prepare_validated(
    cube: &Array3<f64>,
    label_map: &Array2<u32>,
    config: &DatasetConfig,
) -> Result<PreparedDataset> {
    let start = Instant::now();

    let (features, basis) = if config.apply_reduction {
        let options = ReducerOptions {
            standardize: config.standardize,
        };
        let (reduced, basis) = reduce_cube(cube, config.num_components, options)?;
        (Cow::Owned(reduced), Some(basis))
    } else {
        if config.standardize {
            warn!("standardize has no effect when the reducer is disabled");
        }
        (Cow::Borrowed(cube), None)
    };

    let patches = create_patches(
        &features,
        label_map,
        config.window_size,
        config.remove_zero_labels,
    )?;
    drop(features);

    let mut split_rng = ChaCha8Rng::seed_from_u64(config.split_seed);
    let Split { train, test } = stratified_split(&patches, config.test_ratio, &mut split_rng)?;
    drop(patches);

    let mut balance_rng = ChaCha8Rng::seed_from_u64(config.balance_seed);
    let mut train = oversample_weak_classes(&train, &mut balance_rng).patches;

    let mut augment_rng = ChaCha8Rng::seed_from_u64(config.augment_seed);
    let augmentation = augment_patches(&mut train.data, &mut augment_rng);

    info!(
        "Dataset prepared in {:?}: train {:?}, test {:?}",
        start.elapsed(),
        train.data.dim(),
        test.data.dim()
    );
    Ok(PreparedDataset {
        train,
        test,
        basis,
        augmentation,
    })
}

/// Loads the inputs from `source`, prepares the dataset and writes the four
/// artifacts to `sink`, plus the projection basis if `request.save_basis` is set.
///
/// The config is checked before anything is loaded. The sink sees no write unless
/// every stage succeeded; if a write fails, the staged writes are aborted.
pub fn generate_dataset<S, K>(
    source: &S,
    sink: &mut K,
    request: &DatasetRequest,
    config: &DatasetConfig,
) -> Result<PreparedDataset>
where
    S: ArraySource + ?Sized,
    K: ArraySink + ?Sized,
{
    config.validate()?;
    let cube = source.load_cube(&request.cube_key)?;
    let label_map = source.load_label_map(&request.labels_key)?;
    let prepared = prepare_validated(&cube, &label_map, config)?;

    if let Err(e) = persist(&prepared, sink, request, config) {
        sink.abort();
        return Err(e);
    }
    Ok(prepared)
}

fn persist<K: ArraySink + ?Sized>(
    prepared: &PreparedDataset,
    sink: &mut K,
    request: &DatasetRequest,
    config: &DatasetConfig,
) -> Result<()> {
    sink.save_patches(&artifact_name(ArtifactKind::TrainData, config), &prepared.train.data)?;
    sink.save_patches(&artifact_name(ArtifactKind::TestData, config), &prepared.test.data)?;
    sink.save_labels(&artifact_name(ArtifactKind::TrainLabels, config), &prepared.train.labels)?;
    sink.save_labels(&artifact_name(ArtifactKind::TestLabels, config), &prepared.test.labels)?;
    if request.save_basis {
        match &prepared.basis {
            Some(basis) => sink.save_basis(&basis_file_name(config), basis)?,
            None => warn!("save_basis ignored: the reducer is disabled"),
        }
    }
    sink.commit()
}
