//! Cross-validation splitters

use crate::data::{distinct_sorted, TaskType};
use crate::error::{PrognosError, Result};
use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Cross-validation strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CVStrategy {
    /// K-Fold cross-validation
    KFold { n_splits: usize, shuffle: bool },
    /// Stratified K-Fold (maintains class distribution)
    StratifiedKFold { n_splits: usize, shuffle: bool },
}

impl Default for CVStrategy {
    fn default() -> Self {
        CVStrategy::KFold {
            n_splits: 5,
            shuffle: true,
        }
    }
}

impl CVStrategy {
    /// Stratified for classification, plain k-fold otherwise
    pub fn for_task(task: TaskType, n_splits: usize) -> Self {
        match task {
            TaskType::Classification => CVStrategy::StratifiedKFold {
                n_splits,
                shuffle: true,
            },
            _ => CVStrategy::KFold {
                n_splits,
                shuffle: true,
            },
        }
    }
}

/// A single train/test split
#[derive(Debug, Clone, PartialEq)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Cross-validation splitter
#[derive(Debug, Clone)]
pub struct CrossValidator {
    strategy: CVStrategy,
    random_state: u64,
}

impl CrossValidator {
    pub fn new(strategy: CVStrategy) -> Self {
        Self {
            strategy,
            random_state: 0,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Generate train/test splits
    pub fn split(&self, n_samples: usize, y: Option<&Array1<f64>>) -> Result<Vec<CVSplit>> {
        match &self.strategy {
            CVStrategy::KFold { n_splits, shuffle } => {
                self.k_fold_split(n_samples, *n_splits, *shuffle)
            }
            CVStrategy::StratifiedKFold { n_splits, shuffle } => {
                let y = y.ok_or_else(|| {
                    PrognosError::InvalidInput("StratifiedKFold requires target array".to_string())
                })?;
                self.stratified_k_fold_split(n_samples, y, *n_splits, *shuffle)
            }
        }
    }

    fn check_sizes(n_samples: usize, n_splits: usize) -> Result<()> {
        if n_splits < 2 {
            return Err(PrognosError::ConfigError("n_splits must be at least 2".to_string()));
        }
        if n_samples < n_splits {
            return Err(PrognosError::DataError(format!(
                "n_samples ({}) must be >= n_splits ({})",
                n_samples, n_splits
            )));
        }
        Ok(())
    }

    fn folds_to_splits(folds: Vec<Vec<usize>>) -> Vec<CVSplit> {
        (0..folds.len())
            .map(|fold_idx| CVSplit {
                test_indices: folds[fold_idx].clone(),
                train_indices: folds
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != fold_idx)
                    .flat_map(|(_, f)| f.iter().copied())
                    .collect(),
                fold_idx,
            })
            .collect()
    }

    fn k_fold_split(&self, n_samples: usize, n_splits: usize, shuffle: bool) -> Result<Vec<CVSplit>> {
        Self::check_sizes(n_samples, n_splits)?;

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
            indices.shuffle(&mut rng);
        }

        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;
        let mut folds = Vec::with_capacity(n_splits);
        let mut current = 0;
        for i in 0..n_splits {
            let size = if i < remainder { base + 1 } else { base };
            folds.push(indices[current..current + size].to_vec());
            current += size;
        }

        Ok(Self::folds_to_splits(folds))
    }

    /// Deals each class's (shuffled) members round-robin over the folds,
    /// continuing where the previous class stopped
    fn stratified_k_fold_split(
        &self,
        n_samples: usize,
        y: &Array1<f64>,
        n_splits: usize,
        shuffle: bool,
    ) -> Result<Vec<CVSplit>> {
        Self::check_sizes(n_samples, n_splits)?;
        if y.len() != n_samples {
            return Err(PrognosError::ShapeError {
                expected: format!("{} labels", n_samples),
                actual: format!("{} labels", y.len()),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
        let mut next_fold = 0;
        for class in distinct_sorted(y) {
            let mut members: Vec<usize> = (0..n_samples).filter(|&i| y[i] == class).collect();
            if shuffle {
                members.shuffle(&mut rng);
            }
            for idx in members {
                folds[next_fold].push(idx);
                next_fold = (next_fold + 1) % n_splits;
            }
        }
        for fold in &mut folds {
            fold.sort_unstable();
        }

        Ok(Self::folds_to_splits(folds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kfold_partitions() {
        let cv = CrossValidator::new(CVStrategy::KFold {
            n_splits: 3,
            shuffle: true,
        })
        .with_random_state(42);
        let splits = cv.split(10, None).unwrap();
        assert_eq!(splits.len(), 3);

        let mut all_test: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        all_test.sort();
        assert_eq!(all_test, (0..10).collect::<Vec<_>>());
        for s in &splits {
            assert_eq!(s.train_indices.len() + s.test_indices.len(), 10);
        }
    }

    #[test]
    fn test_stratified_balance() {
        let y = Array1::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let cv = CrossValidator::new(CVStrategy::StratifiedKFold {
            n_splits: 3,
            shuffle: true,
        })
        .with_random_state(1);
        let splits = cv.split(9, Some(&y)).unwrap();
        for s in &splits {
            let positives = s.test_indices.iter().filter(|&&i| y[i] == 1.0).count();
            assert_eq!(positives, 1);
            assert_eq!(s.test_indices.len(), 3);
        }
    }

    #[test]
    fn test_same_seed_same_splits() {
        let cv = CrossValidator::new(CVStrategy::default()).with_random_state(7);
        assert_eq!(cv.split(20, None).unwrap(), cv.split(20, None).unwrap());
    }

    #[test]
    fn test_too_few_samples() {
        let cv = CrossValidator::new(CVStrategy::KFold {
            n_splits: 5,
            shuffle: false,
        });
        assert!(cv.split(3, None).is_err());
    }
}
