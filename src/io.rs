// Loading and persisting arrays as .npy files

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::{Array, Array1, Array2, Array3, Array4, Dimension};
use ndarray_npy::{read_npy, write_npy, ReadNpyError, ReadableElement, WriteNpyExt};

use crate::config::DatasetConfig;
use crate::error::{DatasetError, Result, Stage};
use crate::reduce::ProjectionBasis;

/// Provides the input cube and label map.
pub trait ArraySource {
    /// Cube of shape (height, width, bands).
    fn load_cube(&self, key: &str) -> Result<Array3<f64>>;
    /// Label map of shape (height, width); 0 is background.
    fn load_label_map(&self, key: &str) -> Result<Array2<u32>>;
}

/// Receives the output arrays. Nothing is final until `commit` succeeds.
pub trait ArraySink {
    fn save_patches(&mut self, name: &str, data: &Array4<f64>) -> Result<()>;
    fn save_labels(&mut self, name: &str, labels: &Array1<u32>) -> Result<()>;
    fn save_basis(&mut self, name: &str, basis: &ProjectionBasis) -> Result<()>;
    /// Publishes everything saved since the last commit, or nothing if it fails.
    fn commit(&mut self) -> Result<()>;
    /// Drops everything saved since the last commit.
    fn abort(&mut self);
}

/// The four arrays written per run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    TrainData,
    TestData,
    TrainLabels,
    TestLabels,
}

impl ArtifactKind {
    fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::TrainData => "Xtrain",
            ArtifactKind::TestData => "Xtest",
            ArtifactKind::TrainLabels => "ytrain",
            ArtifactKind::TestLabels => "ytest",
        }
    }
}

/// File name for one artifact, unique per (window size, component count, test ratio).
///
/// `XtrainWindowSize5PCA30testRatio0.25.npy`, or `XtrainWindowSize5.npy` when the
/// reducer is disabled.
pub fn artifact_name(kind: ArtifactKind, config: &DatasetConfig) -> String {
    if config.apply_reduction {
        format!(
            "{}WindowSize{}PCA{}testRatio{}.npy",
            kind.prefix(),
            config.window_size,
            config.num_components,
            config.test_ratio
        )
    } else {
        format!("{}WindowSize{}.npy", kind.prefix(), config.window_size)
    }
}

/// File name for the fitted projection basis of a run.
pub fn basis_file_name(config: &DatasetConfig) -> String {
    format!(
        "basisWindowSize{}PCA{}testRatio{}.bin",
        config.window_size, config.num_components, config.test_ratio
    )
}

/// A directory of `.npy` files, usable both as input container and output target.
///
/// Keys map to `<root>/<key>.npy`. Saved arrays are first written as
/// `<name>.partial` and renamed into place on [`ArraySink::commit`]. A commit that
/// fails part way leaves neither targets nor staged files behind; a target that
/// existed before the run and was already replaced is removed too.
#[derive(Debug)]
pub struct NpyDirectory {
    root: PathBuf,
    pending: Vec<(PathBuf, PathBuf)>,
}

impl NpyDirectory {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        NpyDirectory {
            root: root.as_ref().to_path_buf(),
            pending: Vec::new(),
        }
    }

    /// Like [`NpyDirectory::new`], creating the directory if needed.
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|source| DatasetError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        if key.ends_with(".npy") {
            self.root.join(key)
        } else {
            self.root.join(format!("{}.npy", key))
        }
    }

    fn existing_key_path(&self, key: &str) -> Result<PathBuf> {
        let path = self.key_path(key);
        if !path.is_file() {
            return Err(DatasetError::MissingArray {
                container: self.root.clone(),
                key: key.to_string(),
            });
        }
        Ok(path)
    }

    fn stage_write<F>(&mut self, name: &str, write: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let target = self.root.join(name);
        let partial = self.root.join(format!("{}.partial", name));
        if let Err(e) = write(&partial) {
            if partial.exists() {
                remove_staged(&partial);
            }
            return Err(e);
        }
        debug!("Persister: staged {:?}", partial);
        self.pending.push((partial, target));
        Ok(())
    }
}

fn remove_staged(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Persister: could not remove {:?}: {}", path, e);
    }
}

fn write_array<T>(path: &Path, array: &T) -> Result<()>
where
    T: WriteNpyExt,
{
    write_npy(path, array).map_err(|source| DatasetError::WriteArray {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads `path` as element type `A` and widens it to f64. `Ok(None)` if the file
/// holds a different element type.
fn try_read<A, D, F>(path: &Path, convert: F) -> Result<Option<Array<f64, D>>>
where
    A: ReadableElement + Copy,
    D: Dimension,
    F: Fn(A) -> f64,
{
    match read_npy::<_, Array<A, D>>(path) {
        Ok(array) => Ok(Some(array.mapv(convert))),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(source) => Err(DatasetError::ReadArray {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Reads any real or integer `.npy` array as f64.
fn read_as_f64<D: Dimension>(path: &Path) -> Result<Array<f64, D>> {
    if let Some(array) = try_read::<f64, D, _>(path, |v| v)? {
        return Ok(array);
    }
    if let Some(array) = try_read::<f32, D, _>(path, f64::from)? {
        return Ok(array);
    }
    if let Some(array) = try_read::<u16, D, _>(path, f64::from)? {
        return Ok(array);
    }
    if let Some(array) = try_read::<i16, D, _>(path, f64::from)? {
        return Ok(array);
    }
    if let Some(array) = try_read::<u8, D, _>(path, f64::from)? {
        return Ok(array);
    }
    if let Some(array) = try_read::<i8, D, _>(path, f64::from)? {
        return Ok(array);
    }
    if let Some(array) = try_read::<i32, D, _>(path, f64::from)? {
        return Ok(array);
    }
    if let Some(array) = try_read::<u32, D, _>(path, f64::from)? {
        return Ok(array);
    }
    if let Some(array) = try_read::<i64, D, _>(path, |v| v as f64)? {
        return Ok(array);
    }
    if let Some(array) = try_read::<u64, D, _>(path, |v| v as f64)? {
        return Ok(array);
    }
    Err(DatasetError::invalid_parameter(
        Stage::Loader,
        "dtype",
        path.display(),
        "expected a real or integer array",
    ))
}

impl ArraySource for NpyDirectory {
    fn load_cube(&self, key: &str) -> Result<Array3<f64>> {
        let path = self.existing_key_path(key)?;
        let cube: Array3<f64> = read_as_f64(&path)?;
        info!("Loader: cube {:?} from {:?}", cube.dim(), path);
        Ok(cube)
    }

    fn load_label_map(&self, key: &str) -> Result<Array2<u32>> {
        let path = self.existing_key_path(key)?;
        let raw: Array2<f64> = read_as_f64(&path)?;
        if let Some(&bad) = raw
            .iter()
            .find(|&&v| !(v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64))
        {
            return Err(DatasetError::invalid_parameter(
                Stage::Loader,
                "label",
                bad,
                "labels must be non-negative integers",
            ));
        }
        let labels = raw.mapv(|v| v as u32);
        info!("Loader: label map {:?} from {:?}", labels.dim(), path);
        Ok(labels)
    }
}

impl ArraySink for NpyDirectory {
    fn save_patches(&mut self, name: &str, data: &Array4<f64>) -> Result<()> {
        self.stage_write(name, |path| write_array(path, data))
    }

    fn save_labels(&mut self, name: &str, labels: &Array1<u32>) -> Result<()> {
        self.stage_write(name, |path| write_array(path, labels))
    }

    fn save_basis(&mut self, name: &str, basis: &ProjectionBasis) -> Result<()> {
        self.stage_write(name, |path| basis.save(path))
    }

    /// Renames every staged file into place. If a rename fails, the targets renamed
    /// so far are removed again along with the remaining staged files.
    fn commit(&mut self) -> Result<()> {
        let failure = self
            .pending
            .iter()
            .enumerate()
            .find_map(|(i, (partial, target))| fs::rename(partial, target).err().map(|e| (i, e)));

        let pending = std::mem::take(&mut self.pending);
        let Some((failed, source)) = failure else {
            for (_, target) in &pending {
                info!("Persister: wrote {:?}", target);
            }
            return Ok(());
        };

        warn!(
            "Persister: publishing {:?} failed, rolling back {} staged files",
            pending[failed].1,
            pending.len()
        );
        for (_, target) in &pending[..failed] {
            remove_staged(target);
        }
        for (partial, _) in &pending[failed..] {
            remove_staged(partial);
        }
        Err(DatasetError::Io {
            path: pending[failed].1.clone(),
            source,
        })
    }

    fn abort(&mut self) {
        for (partial, _) in self.pending.drain(..) {
            remove_staged(&partial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_encode_parameters() {
        let config = DatasetConfig::default();
        assert_eq!(
            artifact_name(ArtifactKind::TrainData, &config),
            "XtrainWindowSize5PCA30testRatio0.25.npy"
        );
        assert_eq!(
            artifact_name(ArtifactKind::TestLabels, &config),
            "ytestWindowSize5PCA30testRatio0.25.npy"
        );
        assert_eq!(basis_file_name(&config), "basisWindowSize5PCA30testRatio0.25.bin");

        let raw = DatasetConfig {
            apply_reduction: false,
            window_size: 7,
            ..Default::default()
        };
        assert_eq!(artifact_name(ArtifactKind::TestData, &raw), "XtestWindowSize7.npy");
    }

    #[test]
    fn different_parameters_do_not_collide() {
        let a = DatasetConfig::default();
        let b = DatasetConfig { test_ratio: 0.1, ..Default::default() };
        let c = DatasetConfig { num_components: 15, ..Default::default() };
        let names: Vec<String> = [&a, &b, &c]
            .iter()
            .map(|config| artifact_name(ArtifactKind::TrainData, config))
            .collect();
        assert_ne!(names[0], names[1]);
        assert_ne!(names[0], names[2]);
        assert_ne!(names[1], names[2]);
    }

    #[test]
    fn keys_map_to_npy_files() {
        let dir = NpyDirectory::new("/data");
        assert_eq!(dir.key_path("cube"), PathBuf::from("/data/cube.npy"));
        assert_eq!(dir.key_path("cube.npy"), PathBuf::from("/data/cube.npy"));
    }
}
