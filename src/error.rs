// src/error.rs

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stage an error originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Config,
    Loader,
    Reducer,
    PatchExtractor,
    Splitter,
    ClassBalancer,
    Augmenter,
    Persister,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Loader => "loader",
            Stage::Reducer => "reducer",
            Stage::PatchExtractor => "patch extractor",
            Stage::Splitter => "splitter",
            Stage::ClassBalancer => "class balancer",
            Stage::Augmenter => "augmenter",
            Stage::Persister => "persister",
        };
        f.write_str(name)
    }
}

/// Every failure is fatal for a run; nothing is retried or clamped.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("[{stage}] invalid dimension: {reason}")]
    InvalidDimension { stage: Stage, reason: String },

    #[error("[{stage}] invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        stage: Stage,
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("[{stage}] insufficient samples: {reason}")]
    InsufficientSamples { stage: Stage, reason: String },

    #[error("[{stage}] linear algebra failure: {reason}")]
    LinearAlgebra { stage: Stage, reason: String },

    #[error("array `{key}` not found in container {container:?}")]
    MissingArray { container: PathBuf, key: String },

    #[error("failed to read array from {path:?}: {source}")]
    ReadArray {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    #[error("failed to write array to {path:?}: {source}")]
    WriteArray {
        path: PathBuf,
        #[source]
        source: ndarray_npy::WriteNpyError,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("projection basis file {path:?}: {reason}")]
    Model { path: PathBuf, reason: String },
}

impl DatasetError {
    pub(crate) fn invalid_dimension(stage: Stage, reason: impl Into<String>) -> Self {
        DatasetError::InvalidDimension {
            stage,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_parameter(
        stage: Stage,
        name: &'static str,
        value: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        DatasetError::InvalidParameter {
            stage,
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn insufficient_samples(stage: Stage, reason: impl Into<String>) -> Self {
        DatasetError::InsufficientSamples {
            stage,
            reason: reason.into(),
        }
    }

    /// Stage tag for pipeline errors; `None` for I/O failures.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DatasetError::InvalidDimension { stage, .. }
            | DatasetError::InvalidParameter { stage, .. }
            | DatasetError::InsufficientSamples { stage, .. }
            | DatasetError::LinearAlgebra { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatasetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_stage_and_parameter() {
        let err = DatasetError::invalid_parameter(Stage::PatchExtractor, "window_size", 4, "must be odd");
        assert_eq!(
            err.to_string(),
            "[patch extractor] invalid parameter: window_size = 4 (must be odd)"
        );
        assert_eq!(err.stage(), Some(Stage::PatchExtractor));
    }

    #[test]
    fn io_errors_carry_no_stage() {
        let err = DatasetError::MissingArray {
            container: PathBuf::from("data"),
            key: "cube".to_string(),
        };
        assert_eq!(err.stage(), None);
    }
}
