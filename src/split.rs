//! Holdout partitioning, the stratified train/test split and stratified k-fold.

use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::feature_engineering::SAMPLE_COLUMN;

pub const HOLDOUT_LABEL: &str = "Holdout";

/// Row indices of a two-way split. Always disjoint and exhaustive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Separates the modeling rows from the rows whose `Sample` is "Holdout".
/// Rows with any other label, including a null one, are modeling rows.
pub fn partition_holdout(df: &DataFrame) -> Result<(DataFrame, DataFrame)> {
    let is_holdout = col(SAMPLE_COLUMN)
        .cast(DataType::String)
        .eq(lit(HOLDOUT_LABEL))
        .fill_null(lit(false));

    let holdout = df.clone().lazy().filter(is_holdout.clone()).collect()?;
    let modeling = df.clone().lazy().filter(is_holdout.not()).collect()?;
    debug!(
        modeling = modeling.height(),
        holdout = holdout.height(),
        "Holdout partitioned"
    );
    Ok((modeling, holdout))
}

/// Row indices of each class, in order.
fn class_indices(labels: &[u8]) -> [Vec<usize>; 2] {
    let mut classes = [Vec::new(), Vec::new()];
    for (i, &label) in labels.iter().enumerate() {
        classes[usize::from(label != 0)].push(i);
    }
    classes
}

/// Shuffles each class with a fixed seed and sends `test_fraction` of it to the
/// test side, so both sides keep the overall class balance.
pub fn stratified_split(labels: &[u8], test_fraction: f64, seed: u64) -> Result<SplitIndices> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(PipelineError::Schema(format!(
            "test fraction must be in [0, 1), got {}",
            test_fraction
        )));
    }

    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for mut members in class_indices(labels) {
        members.shuffle(&mut rng);
        let mut n_test = (members.len() as f64 * test_fraction).round() as usize;
        if n_test == 0 && test_fraction > 0.0 && members.len() >= 2 {
            n_test = 1;
        }
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok(SplitIndices { train, test })
}

/// Stratified k-fold without shuffling.
///
/// Fold sizes per class come from dealing the class-sorted labels round-robin;
/// each class then fills the folds in row order, so every validation fold is a
/// contiguous run of each class.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    pub n_splits: usize,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    /// Returns one (train, validation) pair per fold.
    pub fn split(&self, labels: &[u8]) -> Result<Vec<SplitIndices>> {
        if self.n_splits < 2 {
            return Err(PipelineError::Training(format!(
                "k-fold needs at least 2 splits, got {}",
                self.n_splits
            )));
        }
        let classes = class_indices(labels);
        let smallest = classes.iter().map(Vec::len).min().unwrap_or(0);
        if smallest < self.n_splits {
            return Err(PipelineError::Training(format!(
                "the smallest class has {} rows, fewer than {} folds",
                smallest, self.n_splits
            )));
        }

        let mut allocation = vec![[0usize; 2]; self.n_splits];
        let sorted = classes
            .iter()
            .enumerate()
            .flat_map(|(class, members)| std::iter::repeat(class).take(members.len()));
        for (position, class) in sorted.enumerate() {
            allocation[position % self.n_splits][class] += 1;
        }

        let mut fold_of = vec![0usize; labels.len()];
        for (class, members) in classes.iter().enumerate() {
            let mut rows = members.iter();
            for (fold, counts) in allocation.iter().enumerate() {
                for &row in rows.by_ref().take(counts[class]) {
                    fold_of[row] = fold;
                }
            }
        }

        Ok((0..self.n_splits)
            .map(|fold| {
                let (test, train): (Vec<usize>, Vec<usize>) =
                    (0..labels.len()).partition(|&row| fold_of[row] == fold);
                SplitIndices { train, test }
            })
            .collect())
    }
}
