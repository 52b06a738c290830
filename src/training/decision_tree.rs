//! Decision tree implementation

use crate::error::{Result, WorkbenchError};
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with prediction value
    Leaf { value: f64, n_samples: usize },
    /// Internal node; samples with `x[feature_idx] <= threshold` go left
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        impurity: f64,
    },
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Gini impurity (classification)
    Gini,
    /// Entropy (classification)
    Entropy,
    /// Mean squared error (regression)
    Mse,
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    /// Maximum depth, unbounded when `None`
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Features sampled per split; all when `None`
    pub max_features: Option<usize>,
    pub criterion: Criterion,
    /// Seed for per-split feature sampling
    pub random_state: u64,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
    is_classification: bool,
    classes: Vec<f64>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new_classifier()
    }
}

impl DecisionTree {
    /// Create a new classifier tree
    pub fn new_classifier() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            criterion: Criterion::Gini,
            random_state: 42,
            n_features: 0,
            feature_importances: None,
            is_classification: true,
            classes: Vec::new(),
        }
    }

    /// Create a new regressor tree
    pub fn new_regressor() -> Self {
        Self {
            criterion: Criterion::Mse,
            is_classification: false,
            ..Self::new_classifier()
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn is_classification(&self) -> bool {
        self.is_classification
    }

    /// Fit the tree to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(WorkbenchError::Training(
                "cannot fit a decision tree on zero samples".to_string(),
            ));
        }

        self.n_features = n_features;
        let labels = if self.is_classification {
            let mut classes: Vec<f64> = y.to_vec();
            classes.sort_by(|a, b| a.total_cmp(b));
            classes.dedup();
            let labels = y
                .iter()
                .map(|v| classes.partition_point(|c| c < v))
                .collect();
            self.classes = classes;
            labels
        } else {
            Vec::new()
        };

        let mut builder = Builder {
            tree: self,
            x,
            y,
            labels,
            importances: vec![0.0; n_features],
            rng: ChaCha8Rng::seed_from_u64(self.random_state),
        };
        let indices: Vec<usize> = (0..n_samples).collect();
        let root = builder.build(&indices, 0);

        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }

        self.root = Some(root);
        self.feature_importances = Some(Array1::from_vec(importances));
        Ok(self)
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| WorkbenchError::Training("decision tree is not fitted".to_string()))?;
        if x.ncols() != self.n_features {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        Ok(x.rows().into_iter().map(|row| predict_sample(root, row)).collect())
    }

    /// Normalized impurity decrease per feature
    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    /// Edges on the longest root-to-leaf path
    pub fn get_depth(&self) -> usize {
        self.root.as_ref().map_or(0, node_depth)
    }

    pub fn get_n_leaves(&self) -> usize {
        self.root.as_ref().map_or(0, count_leaves)
    }
}

fn predict_sample(node: &TreeNode, sample: ArrayView1<f64>) -> f64 {
    match node {
        TreeNode::Leaf { value, .. } => *value,
        TreeNode::Split {
            feature_idx,
            threshold,
            left,
            right,
            ..
        } => {
            if sample[*feature_idx] <= *threshold {
                predict_sample(left, sample)
            } else {
                predict_sample(right, sample)
            }
        }
    }
}

fn node_depth(node: &TreeNode) -> usize {
    match node {
        TreeNode::Leaf { .. } => 0,
        TreeNode::Split { left, right, .. } => 1 + node_depth(left).max(node_depth(right)),
    }
}

fn count_leaves(node: &TreeNode) -> usize {
    match node {
        TreeNode::Leaf { .. } => 1,
        TreeNode::Split { left, right, .. } => count_leaves(left) + count_leaves(right),
    }
}

/// Running sufficient statistics for one side of a candidate split
#[derive(Clone)]
struct NodeStats {
    count: usize,
    sum: f64,
    sq_sum: f64,
    class_counts: Vec<usize>,
}

impl NodeStats {
    fn empty(n_classes: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sq_sum: 0.0,
            class_counts: vec![0; n_classes],
        }
    }

    fn add(&mut self, value: f64, label: Option<usize>) {
        self.count += 1;
        self.sum += value;
        self.sq_sum += value * value;
        if let Some(label) = label {
            self.class_counts[label] += 1;
        }
    }

    fn remove(&mut self, value: f64, label: Option<usize>) {
        self.count -= 1;
        self.sum -= value;
        self.sq_sum -= value * value;
        if let Some(label) = label {
            self.class_counts[label] -= 1;
        }
    }

    fn impurity(&self, criterion: Criterion) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        match criterion {
            Criterion::Gini => {
                1.0 - self
                    .class_counts
                    .iter()
                    .map(|&c| (c as f64 / n).powi(2))
                    .sum::<f64>()
            }
            Criterion::Entropy => -self
                .class_counts
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / n;
                    p * p.log2()
                })
                .sum::<f64>(),
            Criterion::Mse => (self.sq_sum / n - (self.sum / n).powi(2)).max(0.0),
        }
    }
}

struct Builder<'a> {
    tree: &'a DecisionTree,
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    /// Class index per sample; empty for regression
    labels: Vec<usize>,
    importances: Vec<f64>,
    rng: ChaCha8Rng,
}

struct BestSplit {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

impl Builder<'_> {
    fn label(&self, i: usize) -> Option<usize> {
        self.labels.get(i).copied()
    }

    fn stats(&self, indices: &[usize]) -> NodeStats {
        let mut stats = NodeStats::empty(self.tree.classes.len());
        for &i in indices {
            stats.add(self.y[i], self.label(i));
        }
        stats
    }

    fn leaf(&self, stats: &NodeStats) -> TreeNode {
        let value = if self.tree.is_classification {
            // First maximum, so ties go to the smallest class
            let mut best = 0;
            for (k, &c) in stats.class_counts.iter().enumerate() {
                if c > stats.class_counts[best] {
                    best = k;
                }
            }
            self.tree.classes.get(best).copied().unwrap_or(0.0)
        } else if stats.count > 0 {
            stats.sum / stats.count as f64
        } else {
            0.0
        };
        TreeNode::Leaf {
            value,
            n_samples: stats.count,
        }
    }

    fn build(&mut self, indices: &[usize], depth: usize) -> TreeNode {
        let stats = self.stats(indices);
        let impurity = stats.impurity(self.tree.criterion);
        let n_samples = indices.len();

        let should_stop = n_samples < self.tree.min_samples_split
            || n_samples < 2 * self.tree.min_samples_leaf
            || self.tree.max_depth.map_or(false, |d| depth >= d)
            || impurity <= 1e-12;
        if should_stop {
            return self.leaf(&stats);
        }

        let Some(best) = self.find_best_split(indices, &stats, impurity) else {
            return self.leaf(&stats);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.x[[i, best.feature_idx]] <= best.threshold);
        if left.len() < self.tree.min_samples_leaf || right.len() < self.tree.min_samples_leaf {
            return self.leaf(&stats);
        }

        self.importances[best.feature_idx] += n_samples as f64 * best.gain;

        let left = Box::new(self.build(&left, depth + 1));
        let right = Box::new(self.build(&right, depth + 1));
        TreeNode::Split {
            feature_idx: best.feature_idx,
            threshold: best.threshold,
            left,
            right,
            n_samples,
            impurity,
        }
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let n_features = self.tree.n_features;
        match self.tree.max_features {
            Some(m) if m < n_features => {
                let mut picked = rand::seq::index::sample(&mut self.rng, n_features, m.max(1)).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..n_features).collect(),
        }
    }

    /// Sweep each candidate feature in sorted order, moving one sample at a
    /// time from the right side to the left.
    fn find_best_split(
        &mut self,
        indices: &[usize],
        parent: &NodeStats,
        parent_impurity: f64,
    ) -> Option<BestSplit> {
        let n = indices.len() as f64;
        let min_leaf = self.tree.min_samples_leaf;
        let criterion = self.tree.criterion;
        let mut best: Option<BestSplit> = None;

        for feature_idx in self.candidate_features() {
            let mut order = indices.to_vec();
            order.sort_by(|&a, &b| self.x[[a, feature_idx]].total_cmp(&self.x[[b, feature_idx]]));

            let mut left = NodeStats::empty(self.tree.classes.len());
            let mut right = parent.clone();

            for pos in 0..order.len() - 1 {
                let i = order[pos];
                left.add(self.y[i], self.label(i));
                right.remove(self.y[i], self.label(i));

                let here = self.x[[i, feature_idx]];
                let next = self.x[[order[pos + 1], feature_idx]];
                if here == next || left.count < min_leaf || right.count < min_leaf {
                    continue;
                }

                let weighted = (left.count as f64 * left.impurity(criterion)
                    + right.count as f64 * right.impurity(criterion))
                    / n;
                let gain = parent_impurity - weighted;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature_idx,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_classifier_simple() {
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];

        let mut tree = DecisionTree::new_classifier();
        tree.fit(&x, &y).unwrap();

        let predictions = tree.predict(&x).unwrap();
        assert_eq!(predictions, y);
    }

    #[test]
    fn test_classifier_non_contiguous_labels() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![5.0, 5.0, 5.0, -1.0, -1.0, -1.0];

        let mut tree = DecisionTree::new_classifier();
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&array![[0.0], [20.0]]).unwrap(), array![5.0, -1.0]);
    }

    #[test]
    fn test_regressor_simple() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0];

        let mut tree = DecisionTree::new_regressor();
        tree.fit(&x, &y).unwrap();

        let predictions = tree.predict(&x).unwrap();
        let mse: f64 = predictions
            .iter()
            .zip(y.iter())
            .map(|(p, a)| (p - a).powi(2))
            .sum::<f64>()
            / y.len() as f64;
        assert!(mse < 1e-12, "unbounded tree should memorize: {}", mse);
    }

    #[test]
    fn test_max_depth() {
        let x = array![[1.0, 1.0], [2.0, 5.0], [3.0, 2.0], [4.0, 4.0], [5.0, 3.0]];
        let y = array![0.0, 1.0, 0.0, 1.0, 0.0];

        let mut tree = DecisionTree::new_classifier().with_max_depth(Some(1));
        tree.fit(&x, &y).unwrap();

        assert!(tree.get_depth() <= 1);
        assert!(tree.get_n_leaves() <= 2);
    }

    #[test]
    fn test_min_samples_split_stops_growth() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0.0, 1.0, 0.0, 1.0];

        let mut tree = DecisionTree::new_classifier().with_min_samples_split(10);
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.get_n_leaves(), 1);
        // Tie between the two classes resolves to the smaller label
        assert_eq!(tree.predict(&x).unwrap(), array![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_min_samples_leaf_blocks_small_leaves() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 1.0];

        let mut unconstrained = DecisionTree::new_classifier();
        unconstrained.fit(&x, &y).unwrap();
        assert_eq!(unconstrained.predict(&array![[6.0]]).unwrap(), array![1.0]);

        let mut tree = DecisionTree::new_classifier().with_min_samples_leaf(2);
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&array![[6.0]]).unwrap(), array![0.0]);
    }

    #[test]
    fn test_feature_importances() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];

        let mut tree = DecisionTree::new_classifier();
        tree.fit(&x, &y).unwrap();

        let importances = tree.feature_importances().unwrap();
        assert_eq!(importances[0], 1.0);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let tree = DecisionTree::new_regressor();
        assert!(tree.predict(&array![[1.0]]).is_err());
    }
}
