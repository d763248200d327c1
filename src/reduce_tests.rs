use crate::error::{DatasetError, Stage};
use crate::reduce::{normalize_sign, reduce_cube, ProjectionBasis, ReducerOptions};

use approx::assert_abs_diff_eq;
use ndarray::{array, Array2, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::NamedTempFile;

fn generate_random_data(n_samples: usize, n_features: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_fn((n_samples, n_features), |(_, j)| {
        // Different spreads per band so the eigenvalues are well separated.
        rng.gen::<f64>() * (j + 1) as f64 * 3.0
    })
}

fn generate_random_cube(height: usize, width: usize, bands: usize, seed: u64) -> Array3<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array3::from_shape_fn((height, width, bands), |(_, _, b)| rng.gen::<f64>() + b as f64 * 0.5)
}

#[cfg(test)]
mod fit_tests {
    use super::*;

    #[test]
    fn keeps_exactly_the_requested_components() {
        let data = generate_random_data(120, 6, 7);
        for k in 1..=6 {
            let basis = ProjectionBasis::fit(data.clone(), k, ReducerOptions::default()).unwrap();
            assert_eq!(basis.num_components(), k);
            assert_eq!(basis.rotation().dim(), (6, k));
            assert_eq!(basis.explained_variance().len(), k);
            assert_eq!(basis.whitening_scale().len(), k);
        }
    }

    #[test]
    fn rejects_more_components_than_bands() {
        let data = generate_random_data(50, 4, 1);
        match ProjectionBasis::fit(data, 5, ReducerOptions::default()) {
            Err(DatasetError::InvalidDimension { stage, .. }) => assert_eq!(stage, Stage::Reducer),
            other => panic!("expected InvalidDimension, got {:?}", other),
        }
    }

    #[test]
    fn rejects_zero_components() {
        let data = generate_random_data(50, 4, 1);
        assert!(matches!(
            ProjectionBasis::fit(data, 0, ReducerOptions::default()),
            Err(DatasetError::InvalidParameter { name: "num_components", .. })
        ));
    }

    #[test]
    fn rejects_single_sample() {
        let data = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            ProjectionBasis::fit(data, 1, ReducerOptions::default()),
            Err(DatasetError::InvalidDimension { .. })
        ));
    }

    #[test]
    fn collinear_data_has_one_dominant_axis() {
        // y = 2x: every sample lies on the direction (1, 2) / sqrt(5).
        let data = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0], [5.0, 10.0]];
        let basis = ProjectionBasis::fit(data, 2, ReducerOptions::default()).unwrap();

        let first = basis.rotation().column(0);
        let expected = 1.0 / 5.0_f64.sqrt();
        assert_abs_diff_eq!(first[0], expected, epsilon = 1e-9);
        assert_abs_diff_eq!(first[1], 2.0 * expected, epsilon = 1e-9);
        assert_abs_diff_eq!(basis.explained_variance_ratio()[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(basis.explained_variance_ratio()[1], 0.0, epsilon = 1e-9);
        // Second component carries no variance and is left unwhitened.
        assert_abs_diff_eq!(basis.whitening_scale()[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn axes_are_unit_length_and_sign_normalized() {
        let data = generate_random_data(200, 5, 11);
        let basis = ProjectionBasis::fit(data, 5, ReducerOptions::default()).unwrap();
        for column in basis.rotation().columns() {
            assert_abs_diff_eq!(column.dot(&column), 1.0, epsilon = 1e-9);
            let pivot = column
                .iter()
                .copied()
                .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
            assert!(pivot > 0.0, "largest loading should be positive, got {}", pivot);
        }
    }

    #[test]
    fn sign_follows_largest_magnitude_loading() {
        let mut negative = array![0.3, -0.9, 0.2];
        normalize_sign(&mut negative);
        assert_eq!(negative, array![-0.3, 0.9, -0.2]);

        let mut positive = array![-0.5, 0.7, 0.1];
        normalize_sign(&mut positive);
        assert_eq!(positive, array![-0.5, 0.7, 0.1]);

        let mut zeros = array![0.0, 0.0];
        normalize_sign(&mut zeros);
        assert_eq!(zeros, array![0.0, 0.0]);
    }

    #[test]
    fn explained_variance_is_sorted_descending() {
        let data = generate_random_data(300, 6, 3);
        let basis = ProjectionBasis::fit(data, 6, ReducerOptions::default()).unwrap();
        let ev = basis.explained_variance();
        for i in 1..ev.len() {
            assert!(ev[i - 1] >= ev[i], "eigenvalues out of order: {:?}", ev);
        }
        assert_abs_diff_eq!(basis.explained_variance_ratio().sum(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn fit_is_deterministic() {
        let data = generate_random_data(150, 5, 99);
        let a = ProjectionBasis::fit(data.clone(), 3, ReducerOptions::default()).unwrap();
        let b = ProjectionBasis::fit(data, 3, ReducerOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn standardize_divides_by_band_std() {
        let data = array![[0.0, 0.0], [2.0, 200.0], [4.0, 400.0], [6.0, 100.0]];
        let expected_std = data.std_axis(Axis(0), 0.0);
        let basis = ProjectionBasis::fit(data, 2, ReducerOptions { standardize: true }).unwrap();
        for (got, want) in basis.band_scale().iter().zip(expected_std.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-12);
        }

        let plain = ProjectionBasis::fit(
            array![[0.0, 0.0], [2.0, 200.0], [4.0, 400.0], [6.0, 100.0]],
            2,
            ReducerOptions::default(),
        )
        .unwrap();
        assert!(plain.band_scale().iter().all(|&s| s == 1.0));
    }
}

#[cfg(test)]
mod transform_tests {
    use super::*;

    #[test]
    fn whitened_scores_have_unit_variance_and_no_correlation() {
        let data = generate_random_data(400, 5, 21);
        let basis = ProjectionBasis::fit(data.clone(), 3, ReducerOptions::default()).unwrap();
        let scores = basis.transform(data).unwrap();
        let n = scores.nrows() as f64;

        let means = scores.mean_axis(Axis(0)).unwrap();
        for &m in means.iter() {
            assert_abs_diff_eq!(m, 0.0, epsilon = 1e-9);
        }
        let cov = scores.t().dot(&scores) / (n - 1.0);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(cov[[i, j]], expected, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn full_rank_round_trip_reconstructs_input() {
        let data = generate_random_data(80, 4, 5);
        for options in [ReducerOptions::default(), ReducerOptions { standardize: true }] {
            let basis = ProjectionBasis::fit(data.clone(), 4, options).unwrap();
            let scores = basis.transform(data.clone()).unwrap();
            let restored = basis.inverse_transform(scores).unwrap();
            for (a, b) in data.iter().zip(restored.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn transform_checks_band_count() {
        let data = generate_random_data(40, 4, 2);
        let basis = ProjectionBasis::fit(data, 2, ReducerOptions::default()).unwrap();
        assert!(matches!(
            basis.transform(Array2::zeros((3, 5))),
            Err(DatasetError::InvalidDimension { .. })
        ));
        assert!(matches!(
            basis.inverse_transform(Array2::zeros((3, 3))),
            Err(DatasetError::InvalidDimension { .. })
        ));
        assert_eq!(basis.transform(Array2::zeros((0, 4))).unwrap().dim(), (0, 2));
    }
}

#[cfg(test)]
mod cube_tests {
    use super::*;

    #[test]
    fn reduced_cube_keeps_spatial_shape() {
        let cube = generate_random_cube(7, 9, 6, 4);
        let (reduced, basis) = reduce_cube(&cube, 3, ReducerOptions::default()).unwrap();
        assert_eq!(reduced.dim(), (7, 9, 3));
        assert_eq!(basis.num_bands(), 6);
    }

    #[test]
    fn pixels_are_flattened_row_major() {
        let cube = generate_random_cube(4, 5, 3, 8);
        let (reduced, basis) = reduce_cube(&cube, 2, ReducerOptions::default()).unwrap();

        // Pixel (2, 3) projected on its own must match the cube entry.
        let pixel = cube.slice(ndarray::s![2, 3, ..]).to_owned().insert_axis(Axis(0));
        let projected = basis.transform(pixel).unwrap();
        for c in 0..2 {
            assert_abs_diff_eq!(reduced[[2, 3, c]], projected[[0, c]], epsilon = 1e-10);
        }
    }

    #[test]
    fn too_many_components_for_cube() {
        let cube = generate_random_cube(3, 3, 2, 1);
        assert!(matches!(
            reduce_cube(&cube, 3, ReducerOptions::default()),
            Err(DatasetError::InvalidDimension { stage: Stage::Reducer, .. })
        ));
    }

    #[test]
    fn single_pixel_cube_is_rejected() {
        let cube = generate_random_cube(1, 1, 4, 1);
        assert!(reduce_cube(&cube, 2, ReducerOptions::default()).is_err());
    }
}

#[cfg(test)]
mod persistence_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn save_and_load_round_trip() {
        let data = generate_random_data(60, 5, 17);
        let basis = ProjectionBasis::fit(data, 3, ReducerOptions { standardize: true }).unwrap();

        let file = NamedTempFile::new().unwrap();
        basis.save(file.path()).unwrap();
        let loaded = ProjectionBasis::load(file.path()).unwrap();
        assert_eq!(basis, loaded);
    }

    #[test]
    fn load_rejects_garbage() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a basis").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            ProjectionBasis::load(file.path()),
            Err(DatasetError::Model { .. })
        ));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ProjectionBasis::load(dir.path().join("missing.bin")),
            Err(DatasetError::Io { .. })
        ));
    }
}
