// Principal component reduction of the spectral axis

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, Array3, Axis, Zip};
use ndarray_linalg::{Eigh, UPLO};
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result, Stage};

/// Standard deviations and eigenvalue roots below this are replaced by 1.0.
const SCALE_SANITIZATION_THRESHOLD: f64 = 1e-9;

/// Options for fitting the projection basis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerOptions {
    /// Divide every band by its standard deviation after centering.
    pub standardize: bool,
}

/// Fitted projection from B spectral bands onto C whitened principal components.
///
/// The basis is fit once over all pixels of a cube, each pixel treated as an
/// independent sample. A sample `x` maps to `((x - mean) / band_scale) · rotation / whitening_scale`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionBasis {
    /// Per-band mean. Shape: (n_bands)
    mean: Array1<f64>,
    /// Per-band divisor applied after centering. All ones unless standardization was
    /// requested; always positive.
    /// Shape: (n_bands)
    band_scale: Array1<f64>,
    /// Principal axes as unit-length columns, ordered by decreasing variance.
    /// Each column is sign-normalized so its largest-magnitude entry is positive.
    /// Shape: (n_bands, n_components)
    rotation: Array2<f64>,
    /// Eigenvalues of the sample covariance for the kept components.
    /// Shape: (n_components)
    explained_variance: Array1<f64>,
    /// Explained variance divided by the total variance over all bands.
    /// Shape: (n_components)
    explained_variance_ratio: Array1<f64>,
    /// Square roots of `explained_variance`, sanitized to be positive.
    /// Shape: (n_components)
    whitening_scale: Array1<f64>,
}

impl ProjectionBasis {
    /// Fits the basis on `data_matrix` of shape (n_samples, n_bands), keeping exactly
    /// `num_components` components.
    ///
    /// The covariance `XᵀX / (n-1)` of the centered (and optionally standardized) data
    /// is eigendecomposed and the eigenpairs are sorted by decreasing eigenvalue.
    /// The result depends only on the data.
    ///
    /// # Errors
    /// - `InvalidParameter` if `num_components` is 0.
    /// - `InvalidDimension` if `num_components` exceeds the band count, the matrix is
    ///   empty, or there are fewer than 2 samples.
    /// - `LinearAlgebra` if the eigendecomposition fails.
    pub fn fit(
        mut data_matrix: Array2<f64>,
        num_components: usize,
        options: ReducerOptions,
    ) -> Result<Self> {
        let n_samples = data_matrix.nrows();
        let n_bands = data_matrix.ncols();

        if num_components == 0 {
            return Err(DatasetError::invalid_parameter(
                Stage::Reducer,
                "num_components",
                num_components,
                "at least one component is required",
            ));
        }
        if n_samples == 0 || n_bands == 0 {
            return Err(DatasetError::invalid_dimension(
                Stage::Reducer,
                format!("input has {} samples and {} bands", n_samples, n_bands),
            ));
        }
        if num_components > n_bands {
            return Err(DatasetError::invalid_dimension(
                Stage::Reducer,
                format!(
                    "requested {} components but the cube only has {} bands",
                    num_components, n_bands
                ),
            ));
        }
        if n_samples < 2 {
            return Err(DatasetError::invalid_dimension(
                Stage::Reducer,
                "at least 2 pixels are required to estimate a covariance",
            ));
        }

        let mean_vector = data_matrix.mean_axis(Axis(0)).ok_or_else(|| {
            DatasetError::invalid_dimension(Stage::Reducer, "failed to compute band means")
        })?;
        data_matrix -= &mean_vector;

        let band_scale = if options.standardize {
            data_matrix
                .map_axis(Axis(0), |column| column.std(0.0))
                .mapv(|val| if val.is_finite() && val > SCALE_SANITIZATION_THRESHOLD { val } else { 1.0 })
        } else {
            Array1::ones(n_bands)
        };
        data_matrix /= &band_scale;

        let mut cov_matrix = data_matrix.t().dot(&data_matrix);
        cov_matrix /= (n_samples - 1) as f64;

        let (vals, vecs) = cov_matrix.eigh(UPLO::Upper).map_err(|e| DatasetError::LinearAlgebra {
            stage: Stage::Reducer,
            reason: format!("eigendecomposition of the band covariance failed: {}", e),
        })?;

        let total_variance: f64 = vals.iter().map(|v| v.max(0.0)).sum();

        let mut eig_pairs: Vec<(f64, Array1<f64>)> = vals
            .into_iter()
            .zip(vecs.columns().into_iter().map(|col| col.to_owned()))
            .collect();
        eig_pairs.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let mut rotation = Array2::<f64>::zeros((n_bands, num_components));
        let mut explained_variance = Array1::<f64>::zeros(num_components);
        for (i, (eig_val, mut eig_vec)) in eig_pairs.into_iter().take(num_components).enumerate() {
            let norm = eig_vec.dot(&eig_vec).sqrt();
            if norm > SCALE_SANITIZATION_THRESHOLD {
                eig_vec.mapv_inplace(|x| x / norm);
            }
            normalize_sign(&mut eig_vec);
            rotation.column_mut(i).assign(&eig_vec);
            explained_variance[i] = eig_val.max(0.0);
        }

        let explained_variance_ratio = if total_variance > SCALE_SANITIZATION_THRESHOLD {
            explained_variance.mapv(|v| v / total_variance)
        } else {
            Array1::zeros(num_components)
        };

        let degenerate = explained_variance
            .iter()
            .filter(|&&v| v.sqrt() <= SCALE_SANITIZATION_THRESHOLD)
            .count();
        if degenerate > 0 {
            warn!(
                "Reducer: {} of {} components carry no variance; they are left unwhitened",
                degenerate, num_components
            );
        }
        let whitening_scale = explained_variance.mapv(|v| {
            let root = v.sqrt();
            if root.is_finite() && root > SCALE_SANITIZATION_THRESHOLD { root } else { 1.0 }
        });

        Ok(ProjectionBasis {
            mean: mean_vector,
            band_scale,
            rotation,
            explained_variance,
            explained_variance_ratio,
            whitening_scale,
        })
    }

    pub fn num_bands(&self) -> usize {
        self.mean.len()
    }

    pub fn num_components(&self) -> usize {
        self.rotation.ncols()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn band_scale(&self) -> &Array1<f64> {
        &self.band_scale
    }

    pub fn rotation(&self) -> &Array2<f64> {
        &self.rotation
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }

    pub fn whitening_scale(&self) -> &Array1<f64> {
        &self.whitening_scale
    }

    /// Projects samples of shape (m, n_bands) onto the whitened components.
    ///
    /// `x` is centered and scaled in place before the projection.
    pub fn transform(&self, mut x: Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.num_bands() {
            return Err(DatasetError::invalid_dimension(
                Stage::Reducer,
                format!(
                    "samples have {} bands but the basis was fit on {}",
                    x.ncols(),
                    self.num_bands()
                ),
            ));
        }
        if x.nrows() == 0 {
            return Ok(Array2::zeros((0, self.num_components())));
        }

        for mut row in x.axis_iter_mut(Axis(0)) {
            Zip::from(row.view_mut())
                .and(&self.mean)
                .and(&self.band_scale)
                .for_each(|val, &m, &s| *val = (*val - m) / s);
        }

        let mut scores = x.dot(&self.rotation);
        scores /= &self.whitening_scale;
        Ok(scores)
    }

    /// Maps whitened scores of shape (m, n_components) back to band space.
    ///
    /// Diagnostic only: exact (up to rounding) when every band was kept.
    pub fn inverse_transform(&self, mut scores: Array2<f64>) -> Result<Array2<f64>> {
        if scores.ncols() != self.num_components() {
            return Err(DatasetError::invalid_dimension(
                Stage::Reducer,
                format!(
                    "scores have {} components but the basis has {}",
                    scores.ncols(),
                    self.num_components()
                ),
            ));
        }
        scores *= &self.whitening_scale;
        let mut x = scores.dot(&self.rotation.t());
        x *= &self.band_scale;
        x += &self.mean;
        Ok(x)
    }

    /// Writes the basis to `path` with bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| DatasetError::Model {
                path: path.to_path_buf(),
                reason: format!("failed to serialize: {}", e),
            })?;
        Ok(())
    }

    /// Reads a basis written by [`ProjectionBasis::save`] and checks it is consistent.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let basis: ProjectionBasis =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard()).map_err(|e| {
                DatasetError::Model {
                    path: path.to_path_buf(),
                    reason: format!("failed to deserialize: {}", e),
                }
            })?;

        let invalid = |reason: String| DatasetError::Model {
            path: path.to_path_buf(),
            reason,
        };
        let n_bands = basis.mean.len();
        let n_components = basis.rotation.ncols();
        if basis.band_scale.len() != n_bands || basis.rotation.nrows() != n_bands {
            return Err(invalid(format!(
                "inconsistent band dimensions: mean={}, band_scale={}, rotation rows={}",
                n_bands,
                basis.band_scale.len(),
                basis.rotation.nrows()
            )));
        }
        if basis.explained_variance.len() != n_components
            || basis.explained_variance_ratio.len() != n_components
            || basis.whitening_scale.len() != n_components
        {
            return Err(invalid(format!(
                "component vectors do not match the {} rotation columns",
                n_components
            )));
        }
        if basis
            .band_scale
            .iter()
            .chain(basis.whitening_scale.iter())
            .any(|&v| !v.is_finite() || v <= 0.0)
        {
            return Err(invalid("scale vectors must be finite and positive".to_string()));
        }
        Ok(basis)
    }
}

/// Flips `axis` so that its largest-magnitude entry is positive.
pub(crate) fn normalize_sign(axis: &mut Array1<f64>) {
    let mut pivot = 0.0_f64;
    for &v in axis.iter() {
        if v.abs() > pivot.abs() {
            pivot = v;
        }
    }
    if pivot < 0.0 {
        axis.mapv_inplace(|v| -v);
    }
}

/// Reduces the band axis of `cube` (H, W, B) to `num_components` whitened components.
///
/// Returns the reduced cube (H, W, C) and the fitted basis.
pub fn reduce_cube(
    cube: &Array3<f64>,
    num_components: usize,
    options: ReducerOptions,
) -> Result<(Array3<f64>, ProjectionBasis)> {
    let (height, width, bands) = cube.dim();
    let start = Instant::now();

    // Row-major flattening: sample index = r * width + c.
    let samples = Array2::from_shape_vec((height * width, bands), cube.iter().copied().collect())
        .map_err(|e| DatasetError::invalid_dimension(Stage::Reducer, e.to_string()))?;

    let basis = ProjectionBasis::fit(samples.clone(), num_components, options)?;
    let scores = basis.transform(samples)?;
    let reduced = Array3::from_shape_vec((height, width, num_components), scores.iter().copied().collect())
        .map_err(|e| DatasetError::invalid_dimension(Stage::Reducer, e.to_string()))?;

    info!(
        "Reducer: ({}, {}, {}) -> ({}, {}, {}), retained variance ratio {:.4}",
        height,
        width,
        bands,
        height,
        width,
        num_components,
        basis.explained_variance_ratio().sum()
    );
    debug!("Reducer: fit and transform took {:?}", start.elapsed());
    Ok((reduced, basis))
}
