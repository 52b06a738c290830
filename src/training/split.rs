//! Train/test partitioning with stratification when the labels allow it

use crate::error::{Result, WorkbenchError};
use crate::preprocessing::TargetVector;
use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Disjoint train/test partitions over a feature matrix and target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitResult {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: TargetVector,
    pub y_test: TargetVector,
    /// Whether class proportions were preserved
    pub stratified: bool,
}

impl SplitResult {
    pub fn n_train(&self) -> usize {
        self.train_indices.len()
    }

    pub fn n_test(&self) -> usize {
        self.test_indices.len()
    }
}

/// Seeded splitter; identical inputs and seed give identical partitions.
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    seed: u64,
}

impl Default for Splitter {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

impl Splitter {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn split(
        &self,
        x: &Array2<f64>,
        y: &TargetVector,
        train_fraction: f64,
    ) -> Result<SplitResult> {
        if !(train_fraction > 0.0 && train_fraction < 1.0) {
            return Err(WorkbenchError::InvalidFraction(train_fraction));
        }

        let n = x.nrows();
        if n != y.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} target values", n),
                actual: format!("{} target values", y.len()),
            });
        }
        if n < 2 {
            return Err(WorkbenchError::DataError(format!(
                "cannot split {} rows into train and test sets",
                n
            )));
        }

        // Tolerance keeps e.g. 1 - 0.7 from rounding 30.000000000000004 up to 31
        let n_test = (((1.0 - train_fraction) * n as f64) - 1e-9).ceil() as usize;
        let n_test = n_test.clamp(1, n - 1);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let classes = group_by_class(&y.values.to_vec());
        let stratifiable = classes.len() > 1 && classes.iter().all(|(_, rows)| rows.len() >= 2);

        let (train_indices, test_indices, stratified) = if !stratifiable {
            debug!(classes = classes.len(), "Stratification not applicable");
            let (train, test) = shuffled_split(n, n_test, &mut rng);
            (train, test, false)
        } else if n_test < classes.len() || n - n_test < classes.len() {
            warn!(
                classes = classes.len(),
                n_test,
                n_train = n - n_test,
                "Partition too small to hold every class, splitting without stratification"
            );
            let (train, test) = shuffled_split(n, n_test, &mut rng);
            (train, test, false)
        } else {
            let (train, test) = stratified_split(&classes, n, n_test, &mut rng);
            (train, test, true)
        };

        debug!(
            n_train = train_indices.len(),
            n_test = test_indices.len(),
            stratified,
            "Split data"
        );

        Ok(SplitResult {
            x_train: x.select(Axis(0), &train_indices),
            x_test: x.select(Axis(0), &test_indices),
            y_train: y.select(&train_indices),
            y_test: y.select(&test_indices),
            train_indices,
            test_indices,
            stratified,
        })
    }
}

/// Split with the default seed.
pub fn split(x: &Array2<f64>, y: &TargetVector, train_fraction: f64) -> Result<SplitResult> {
    Splitter::default().split(x, y, train_fraction)
}

/// Row indices per label, labels in order of first appearance.
fn group_by_class(y: &[f64]) -> Vec<(f64, Vec<usize>)> {
    let mut slot: HashMap<u64, usize> = HashMap::new();
    let mut groups: Vec<(f64, Vec<usize>)> = Vec::new();
    for (i, &label) in y.iter().enumerate() {
        let idx = *slot.entry(label.to_bits()).or_insert_with(|| {
            groups.push((label, Vec::new()));
            groups.len() - 1
        });
        groups[idx].1.push(i);
    }
    groups
}

fn shuffled_split(n: usize, n_test: usize, rng: &mut ChaCha8Rng) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let train = indices.split_off(n_test);
    (train, indices)
}

/// Per-class test quotas by largest remainder so they sum to `n_test`.
fn stratified_split(
    classes: &[(f64, Vec<usize>)],
    n: usize,
    n_test: usize,
    rng: &mut ChaCha8Rng,
) -> (Vec<usize>, Vec<usize>) {
    let exact: Vec<f64> = classes
        .iter()
        .map(|(_, rows)| rows.len() as f64 * n_test as f64 / n as f64)
        .collect();
    let mut quotas: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();

    let mut order: Vec<usize> = (0..classes.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = exact[a] - exact[a].floor();
        let fb = exact[b] - exact[b].floor();
        fb.total_cmp(&fa)
            .then_with(|| classes[b].1.len().cmp(&classes[a].1.len()))
            .then_with(|| a.cmp(&b))
    });
    let mut remaining = n_test - quotas.iter().sum::<usize>();
    for &c in order.iter().cycle() {
        if remaining == 0 {
            break;
        }
        if quotas[c] < classes[c].1.len() - 1 {
            quotas[c] += 1;
            remaining -= 1;
        }
    }

    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for ((_, rows), &quota) in classes.iter().zip(&quotas) {
        let mut rows = rows.clone();
        rows.shuffle(rng);
        test.extend_from_slice(&rows[..quota]);
        train.extend_from_slice(&rows[quota..]);
    }
    train.shuffle(rng);
    test.shuffle(rng);
    (train, test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::TargetKind;
    use ndarray::Array1;
    use std::collections::HashSet;

    fn data(labels: Vec<f64>) -> (Array2<f64>, TargetVector) {
        let n = labels.len();
        let x = Array2::from_shape_fn((n, 2), |(i, j)| (i * 2 + j) as f64);
        (x, TargetVector::new(Array1::from(labels), TargetKind::Integer))
    }

    fn count(values: &TargetVector, label: f64) -> usize {
        values.values.iter().filter(|&&v| v == label).count()
    }

    #[test]
    fn test_invalid_fraction() {
        let (x, y) = data(vec![0.0, 1.0, 0.0, 1.0]);
        for bad in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            assert!(matches!(
                split(&x, &y, bad),
                Err(WorkbenchError::InvalidFraction(_))
            ));
        }
    }

    #[test]
    fn test_seventy_thirty_sizes() {
        let (x, y) = data((0..100).map(|i| (i % 2) as f64).collect());
        let result = split(&x, &y, 0.7).unwrap();
        assert_eq!(result.n_train(), 70);
        assert_eq!(result.n_test(), 30);
        assert_eq!(result.x_train.nrows(), 70);
        assert_eq!(result.y_test.len(), 30);
    }

    #[test]
    fn test_partitions_are_disjoint_and_complete() {
        let (x, y) = data((0..37).map(|i| (i % 3) as f64).collect());
        let result = split(&x, &y, 0.6).unwrap();
        let train: HashSet<_> = result.train_indices.iter().copied().collect();
        let test: HashSet<_> = result.test_indices.iter().copied().collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), 37);
    }

    #[test]
    fn test_stratified_proportions() {
        // 60 / 40 class balance over 100 rows
        let (x, y) = data((0..100).map(|i| if i < 60 { 0.0 } else { 1.0 }).collect());
        let result = split(&x, &y, 0.7).unwrap();
        assert!(result.stratified);
        assert_eq!(count(&result.y_test, 0.0), 18);
        assert_eq!(count(&result.y_test, 1.0), 12);
        assert_eq!(count(&result.y_train, 0.0), 42);
        assert_eq!(count(&result.y_train, 1.0), 28);
    }

    #[test]
    fn test_singleton_class_skips_stratification() {
        let mut labels: Vec<f64> = (0..20).map(|i| (i % 2) as f64).collect();
        labels.push(2.0);
        let (x, y) = data(labels);
        let result = split(&x, &y, 0.7).unwrap();
        assert!(!result.stratified);
        assert_eq!(result.n_train() + result.n_test(), 21);
    }

    #[test]
    fn test_deterministic() {
        let (x, y) = data((0..50).map(|i| (i % 4) as f64).collect());
        let a = split(&x, &y, 0.8).unwrap();
        let b = split(&x, &y, 0.8).unwrap();
        assert_eq!(a.train_indices, b.train_indices);
        assert_eq!(a.test_indices, b.test_indices);
    }

    #[test]
    fn test_rows_follow_indices() {
        let (x, y) = data((0..10).map(|i| (i % 2) as f64).collect());
        let result = split(&x, &y, 0.5).unwrap();
        for (row, &idx) in result.test_indices.iter().enumerate() {
            assert_eq!(result.x_test.row(row), x.row(idx));
            assert_eq!(result.y_test.values[row], y.values[idx]);
        }
    }
}
