// Stratified train/test partitioning

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::validate_test_ratio;
use crate::error::{DatasetError, Result, Stage};
use crate::patches::PatchSet;

/// Disjoint train and test subsets of one patch set.
#[derive(Clone, Debug, PartialEq)]
pub struct Split {
    pub train: PatchSet,
    pub test: PatchSet,
}

/// Apportions `n_draws` slots over classes proportionally to `class_counts`.
///
/// Each class first gets the floor of its proportional share. The slots left over go
/// to the classes with the largest fractional remainders; among equal remainders
/// the recipients are drawn at random.
fn approximate_mode<R: Rng + ?Sized>(class_counts: &[usize], n_draws: usize, rng: &mut R) -> Vec<usize> {
    let total: usize = class_counts.iter().sum();
    if total == 0 {
        return vec![0; class_counts.len()];
    }
    let continuous: Vec<f64> = class_counts
        .iter()
        .map(|&count| count as f64 * n_draws as f64 / total as f64)
        .collect();
    let mut floored: Vec<usize> = continuous.iter().map(|v| v.floor() as usize).collect();
    let remainder: Vec<f64> = continuous
        .iter()
        .zip(&floored)
        .map(|(v, &f)| v - f as f64)
        .collect();

    let mut need_to_add = n_draws.saturating_sub(floored.iter().sum());
    let mut values = remainder.clone();
    values.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    values.dedup();

    for value in values {
        if need_to_add == 0 {
            break;
        }
        let tied: Vec<usize> = (0..remainder.len()).filter(|&i| remainder[i] == value).collect();
        let add_now = tied.len().min(need_to_add);
        for pick in rand::seq::index::sample(rng, tied.len(), add_now).into_vec() {
            floored[tied[pick]] += 1;
        }
        need_to_add -= add_now;
    }
    floored
}

/// Splits `patches` so that `ceil(test_ratio * n)` patches land in the test subset and
/// every class contributes to both subsets in proportion to its size.
///
/// Within each class the members are shuffled before being dealt to train and test;
/// both subsets are shuffled once more at the end. All randomness comes from `rng`.
///
/// # Errors
/// - `InvalidParameter` if `test_ratio` is not strictly between 0 and 1.
/// - `InsufficientSamples` if a class has fewer than 2 members, or if either subset
///   would be smaller than the number of classes.
pub fn stratified_split<R: Rng + ?Sized>(
    patches: &PatchSet,
    test_ratio: f64,
    rng: &mut R,
) -> Result<Split> {
    validate_test_ratio(Stage::Splitter, test_ratio)?;

    let n_samples = patches.len();
    if n_samples == 0 {
        return Err(DatasetError::insufficient_samples(
            Stage::Splitter,
            "no labeled patches to split",
        ));
    }
    let n_test = (test_ratio * n_samples as f64).ceil() as usize;
    let n_train = n_samples - n_test.min(n_samples);
    if n_train == 0 {
        return Err(DatasetError::insufficient_samples(
            Stage::Splitter,
            format!(
                "test_ratio {} leaves no training patches out of {}",
                test_ratio, n_samples
            ),
        ));
    }

    let classes: Vec<(u32, Vec<usize>)> = patches.indices_by_class().into_iter().collect();
    let class_counts: Vec<usize> = classes.iter().map(|(_, members)| members.len()).collect();

    if let Some((label, members)) = classes.iter().find(|(_, members)| members.len() < 2) {
        return Err(DatasetError::insufficient_samples(
            Stage::Splitter,
            format!(
                "class {} has only {} member; at least 2 are needed to stratify",
                label,
                members.len()
            ),
        ));
    }
    if n_train < classes.len() || n_test < classes.len() {
        return Err(DatasetError::insufficient_samples(
            Stage::Splitter,
            format!(
                "{} train and {} test patches cannot hold all {} classes",
                n_train,
                n_test,
                classes.len()
            ),
        ));
    }

    let train_alloc = approximate_mode(&class_counts, n_train, rng);
    let remaining: Vec<usize> = class_counts
        .iter()
        .zip(&train_alloc)
        .map(|(&count, &taken)| count - taken)
        .collect();
    let test_alloc = approximate_mode(&remaining, n_test, rng);

    let mut train_indices = Vec::with_capacity(n_train);
    let mut test_indices = Vec::with_capacity(n_test);
    for (((label, members), &n_i), &t_i) in classes.iter().zip(&train_alloc).zip(&test_alloc) {
        let mut shuffled = members.clone();
        shuffled.shuffle(rng);
        train_indices.extend_from_slice(&shuffled[..n_i]);
        test_indices.extend_from_slice(&shuffled[n_i..n_i + t_i]);
        debug!("Splitter: class {} -> {} train / {} test", label, n_i, t_i);
    }
    train_indices.shuffle(rng);
    test_indices.shuffle(rng);

    info!(
        "Splitter: {} patches -> {} train / {} test (test_ratio {})",
        n_samples,
        train_indices.len(),
        test_indices.len(),
        test_ratio
    );
    Ok(Split {
        train: patches.select(&train_indices),
        test: patches.select(&test_indices),
    })
}
