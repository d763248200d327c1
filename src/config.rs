// src/config.rs

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result, Stage};

/// Parameters of one dataset generation run.
///
/// Passed by reference into every stage; nothing is read from process-wide state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Number of whitened principal components kept by the reducer (C).
    pub num_components: usize,
    /// Side length of the square spatial window around each pixel. Must be odd.
    pub window_size: usize,
    /// Fraction of labeled patches assigned to the test subset, in (0, 1).
    pub test_ratio: f64,
    /// Drop label-0 (background) pixels and shift class ids down by one.
    pub remove_zero_labels: bool,
    /// Run the reducer. When false the raw bands are patched directly.
    pub apply_reduction: bool,
    /// Standardize each band to unit variance before fitting the projection.
    pub standardize: bool,
    /// Seed for the stratified split.
    pub split_seed: u64,
    /// Seed for the global permutation after oversampling.
    pub balance_seed: u64,
    /// Seed for augmentation choices and rotation angles.
    pub augment_seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            num_components: 30,
            window_size: 5,
            test_ratio: 0.25,
            remove_zero_labels: true,
            apply_reduction: true,
            standardize: false,
            split_seed: 345,
            balance_seed: 42,
            augment_seed: 1337,
        }
    }
}

impl DatasetConfig {
    /// Half-width of the window: `(window_size - 1) / 2`.
    pub fn margin(&self) -> usize {
        (self.window_size.saturating_sub(1)) / 2
    }

    /// Checks the parameters that do not depend on the input data.
    ///
    /// `num_components > bands` can only be detected once the cube is known and is
    /// reported by the reducer.
    pub fn validate(&self) -> Result<()> {
        validate_window_size(Stage::Config, self.window_size)?;
        validate_test_ratio(Stage::Config, self.test_ratio)?;
        if self.apply_reduction && self.num_components == 0 {
            return Err(DatasetError::invalid_parameter(
                Stage::Config,
                "num_components",
                self.num_components,
                "at least one component is required",
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_window_size(stage: Stage, window_size: usize) -> Result<()> {
    if window_size == 0 || window_size % 2 == 0 {
        return Err(DatasetError::invalid_parameter(
            stage,
            "window_size",
            window_size,
            "must be an odd integer >= 1",
        ));
    }
    Ok(())
}

pub(crate) fn validate_test_ratio(stage: Stage, test_ratio: f64) -> Result<()> {
    if !(test_ratio.is_finite() && test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(DatasetError::invalid_parameter(
            stage,
            "test_ratio",
            test_ratio,
            "must lie strictly between 0 and 1",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DatasetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.margin(), 2);
    }

    #[test]
    fn even_or_zero_window_is_rejected() {
        for window_size in [0, 2, 6] {
            let config = DatasetConfig { window_size, ..Default::default() };
            match config.validate() {
                Err(DatasetError::InvalidParameter { name, stage, .. }) => {
                    assert_eq!(name, "window_size");
                    assert_eq!(stage, Stage::Config);
                }
                other => panic!("expected InvalidParameter, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_ratio_bounds_are_exclusive() {
        for test_ratio in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            let config = DatasetConfig { test_ratio, ..Default::default() };
            assert!(
                matches!(config.validate(), Err(DatasetError::InvalidParameter { name: "test_ratio", .. })),
                "test_ratio {} should be rejected",
                test_ratio
            );
        }
    }

    #[test]
    fn zero_components_only_matter_when_reducing() {
        let reducing = DatasetConfig { num_components: 0, ..Default::default() };
        assert!(reducing.validate().is_err());

        let raw = DatasetConfig {
            num_components: 0,
            apply_reduction: false,
            ..Default::default()
        };
        assert!(raw.validate().is_ok());
    }
}
