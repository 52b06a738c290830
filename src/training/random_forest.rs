//! Random Forest implementation

use super::decision_tree::{Criterion, DecisionTree};
use crate::error::{Result, WorkbenchError};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Strategy for features sampled at each split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    /// Square root of n_features
    Sqrt,
    /// All features
    All,
}

/// Random Forest model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    pub n_estimators: usize,
    /// Maximum depth per tree
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub random_state: u64,
    is_classification: bool,
    feature_importances: Option<Array1<f64>>,
    n_features: usize,
    classes: Vec<f64>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new_classifier(100)
    }
}

impl RandomForest {
    /// Classifier forest, sqrt(n_features) candidates per split
    pub fn new_classifier(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            random_state: 42,
            is_classification: true,
            feature_importances: None,
            n_features: 0,
            classes: Vec::new(),
        }
    }

    /// Regressor forest, every feature considered per split
    pub fn new_regressor(n_estimators: usize) -> Self {
        Self {
            max_features: MaxFeatures::All,
            is_classification: false,
            ..Self::new_classifier(n_estimators)
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    fn compute_max_features(&self, n_features: usize) -> usize {
        match self.max_features {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::All => n_features,
        }
        .max(1)
    }

    /// Fit the forest. Trees are grown one after another, each from its own
    /// seeded bootstrap sample.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if self.n_estimators == 0 {
            return Err(WorkbenchError::Training(
                "n_estimators must be at least 1".to_string(),
            ));
        }

        self.n_features = n_features;
        let max_features = self.compute_max_features(n_features);

        if self.is_classification {
            let mut classes: Vec<f64> = y.to_vec();
            classes.sort_by(|a, b| a.total_cmp(b));
            classes.dedup();
            self.classes = classes;
        }

        let mut trees = Vec::with_capacity(self.n_estimators);
        for tree_idx in 0..self.n_estimators {
            let seed = self.random_state.wrapping_add(tree_idx as u64);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);

            let sample_indices: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
            let x_boot = x.select(Axis(0), &sample_indices);
            let y_boot: Array1<f64> = sample_indices.iter().map(|&i| y[i]).collect();

            let tree = if self.is_classification {
                DecisionTree::new_classifier().with_criterion(Criterion::Gini)
            } else {
                DecisionTree::new_regressor()
            };
            let mut tree = tree
                .with_max_depth(self.max_depth)
                .with_min_samples_split(self.min_samples_split)
                .with_min_samples_leaf(self.min_samples_leaf)
                .with_max_features(Some(max_features))
                .with_random_state(rng.gen());
            tree.fit(&x_boot, &y_boot)?;
            trees.push(tree);
        }

        self.trees = trees;
        self.compute_feature_importances();
        debug!(
            n_trees = self.trees.len(),
            max_features,
            "Fitted random forest"
        );

        Ok(self)
    }

    fn compute_feature_importances(&mut self) {
        let mut total = Array1::<f64>::zeros(self.n_features);
        for importances in self.trees.iter().filter_map(DecisionTree::feature_importances) {
            total += importances;
        }
        let sum = total.sum();
        if sum > 0.0 {
            total /= sum;
        }
        self.feature_importances = Some(total);
    }

    /// Majority vote for classification (ties go to the smallest class),
    /// mean for regression.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(WorkbenchError::Training("random forest is not fitted".to_string()));
        }

        let all_predictions = self
            .trees
            .iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<Vec<_>>>()?;

        let n_samples = x.nrows();
        let predictions = if self.is_classification {
            (0..n_samples)
                .map(|i| {
                    let mut votes = vec![0usize; self.classes.len()];
                    for preds in &all_predictions {
                        let k = self.classes.partition_point(|c| *c < preds[i]);
                        if k < votes.len() {
                            votes[k] += 1;
                        }
                    }
                    let mut best = 0;
                    for (k, &v) in votes.iter().enumerate() {
                        if v > votes[best] {
                            best = k;
                        }
                    }
                    self.classes.get(best).copied().unwrap_or(0.0)
                })
                .collect()
        } else {
            let n_trees = all_predictions.len() as f64;
            (0..n_samples)
                .map(|i| all_predictions.iter().map(|p| p[i]).sum::<f64>() / n_trees)
                .collect()
        };

        Ok(predictions)
    }

    /// Mean of per-tree importances, renormalized
    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
