// Oversampling of minority classes

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::patches::PatchSet;

/// Train patches after oversampling and shuffling.
#[derive(Clone, Debug, PartialEq)]
pub struct BalancedPatchSet {
    pub patches: PatchSet,
    /// `source_indices[i]` is the row of the input set that produced output row `i`.
    pub source_indices: Vec<usize>,
}

/// Integer repetition factor for a class of `count` patches when the largest class
/// has `max_count`. Rounds half away from zero; never below 1 because
/// `count <= max_count`.
pub fn repetition_factor(max_count: usize, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    ((max_count as f64 / count as f64).round() as usize).max(1)
}

/// Repeats each class `round(max_count / class_count)` times and shuffles the result.
///
/// Classes are laid out in ascending label order, each patch repeated consecutively,
/// before one permutation drawn from `rng` reorders data and labels together.
pub fn oversample_weak_classes<R: Rng + ?Sized>(train: &PatchSet, rng: &mut R) -> BalancedPatchSet {
    let groups = train.indices_by_class();
    let max_count = groups.values().map(Vec::len).max().unwrap_or(0);

    let mut source_indices = Vec::new();
    for (label, members) in &groups {
        let factor = repetition_factor(max_count, members.len());
        debug!(
            "Class balancer: class {} x{} ({} -> {})",
            label,
            factor,
            members.len(),
            members.len() * factor
        );
        for &index in members {
            source_indices.extend(std::iter::repeat(index).take(factor));
        }
    }

    source_indices.shuffle(rng);
    let patches = train.select(&source_indices);
    info!(
        "Class balancer: {} train patches -> {} after oversampling {} classes",
        train.len(),
        patches.len(),
        groups.len()
    );
    BalancedPatchSet {
        patches,
        source_indices,
    }
}
