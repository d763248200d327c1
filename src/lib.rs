// Patch dataset generation for hyperspectral cubes

#![doc = include_str!("../README.md")]

pub mod augment;
pub mod balance;
pub mod config;
pub mod error;
pub mod io;
pub mod patches;
pub mod pipeline;
pub mod reduce;
pub mod split;

#[cfg(test)]
mod reduce_tests;

pub use augment::{augment_patches, rotate, AugmentationSummary, PatchTransform};
pub use balance::{oversample_weak_classes, BalancedPatchSet};
pub use config::DatasetConfig;
pub use error::{DatasetError, Result, Stage};
pub use io::{artifact_name, basis_file_name, ArraySink, ArraySource, ArtifactKind, NpyDirectory};
pub use patches::{create_patches, pad_with_zeros, PatchSet};
pub use pipeline::{generate_dataset, prepare_dataset, DatasetRequest, PreparedDataset};
pub use reduce::{reduce_cube, ProjectionBasis, ReducerOptions};
pub use split::{stratified_split, Split};
