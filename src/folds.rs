use anyhow::{anyhow, Result};
use rand::{seq::SliceRandom, SeedableRng};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Shuffled stratified k-fold split with a fixed seed.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    n_splits: usize,
    seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize, seed: u64) -> Result<Self> {
        if n_splits < 2 {
            return Err(anyhow!(
                "Stratified k-fold needs at least 2 folds (requested {})",
                n_splits
            ));
        }
        Ok(Self { n_splits, seed })
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Each class is shuffled and dealt round-robin over the folds, so fold
    /// sizes per class differ by at most one.
    pub fn split(&self, labels: &[usize]) -> Result<Vec<Fold>> {
        if labels.len() < self.n_splits {
            return Err(anyhow!(
                "Cannot split {} rows into {} folds",
                labels.len(),
                self.n_splits
            ));
        }

        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, label) in labels.iter().enumerate() {
            by_class.entry(*label).or_default().push(row);
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
        let mut assignment = vec![0usize; labels.len()];
        let mut offset = 0usize;
        for rows in by_class.values_mut() {
            rows.shuffle(&mut rng);
            for (position, row) in rows.iter().enumerate() {
                assignment[*row] = (offset + position) % self.n_splits;
            }
            // Continue dealing where the previous class stopped to balance fold sizes.
            offset = (offset + rows.len()) % self.n_splits;
        }

        let folds = (0..self.n_splits)
            .map(|index| {
                let (validation, train): (Vec<usize>, Vec<usize>) =
                    (0..labels.len()).partition(|row| assignment[*row] == index);
                Fold {
                    index,
                    train,
                    validation,
                }
            })
            .collect();
        Ok(folds)
    }
}
