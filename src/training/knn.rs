//! K-Nearest Neighbors implementation
//!
//! Brute-force neighbor search; predictions run in parallel over query rows.

use crate::error::{Result, WorkbenchError};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Distance metric for KNN
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// L2
    #[default]
    Euclidean,
    /// L1
    Manhattan,
}

impl DistanceMetric {
    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(p, q)| (p - q) * (p - q))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Manhattan => a.iter().zip(b.iter()).map(|(p, q)| (p - q).abs()).sum(),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "manhattan" => Ok(DistanceMetric::Manhattan),
            other => Err(format!("unknown metric '{}', expected euclidean or manhattan", other)),
        }
    }
}

/// Weighting scheme for neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightScheme {
    /// All neighbors count equally
    #[default]
    Uniform,
    /// Inverse distance; exact matches take all the weight
    Distance,
}

impl FromStr for WeightScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uniform" => Ok(WeightScheme::Uniform),
            "distance" => Ok(WeightScheme::Distance),
            other => Err(format!("unknown weights '{}', expected uniform or distance", other)),
        }
    }
}

/// KNN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNConfig {
    pub n_neighbors: usize,
    pub metric: DistanceMetric,
    pub weights: WeightScheme,
}

impl Default for KNNConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            metric: DistanceMetric::Euclidean,
            weights: WeightScheme::Uniform,
        }
    }
}

/// Stored training set shared by the classifier and the regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Memory {
    x: Array2<f64>,
    y: Array1<f64>,
}

impl Memory {
    fn fit(config: &KNNConfig, x: &Array2<f64>, y: &Array1<f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        let k = config.n_neighbors;
        if k == 0 || k > x.nrows() {
            return Err(WorkbenchError::Training(format!(
                "expected n_neighbors <= n_samples_fit, but n_neighbors = {}, n_samples_fit = {}",
                k,
                x.nrows()
            )));
        }
        Ok(Self {
            x: x.clone(),
            y: y.clone(),
        })
    }

    fn check_width(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.x.ncols() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} features", self.x.ncols()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(())
    }

    /// (distance, target) of the k closest rows; equal distances keep the
    /// earlier training row.
    fn nearest(&self, query: ArrayView1<f64>, config: &KNNConfig) -> Vec<(f64, f64)> {
        let mut distances: Vec<(f64, usize)> = self
            .x
            .outer_iter()
            .enumerate()
            .map(|(i, row)| (config.metric.distance(query, row), i))
            .collect();
        let k = config.n_neighbors.min(distances.len());
        if k < distances.len() {
            distances.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            distances.truncate(k);
        }
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        distances.into_iter().map(|(d, i)| (d, self.y[i])).collect()
    }
}

/// Per-neighbor weights under the scheme
fn neighbor_weights(neighbors: &[(f64, f64)], scheme: WeightScheme) -> Vec<f64> {
    match scheme {
        WeightScheme::Uniform => vec![1.0; neighbors.len()],
        WeightScheme::Distance => {
            if neighbors.iter().any(|(d, _)| *d == 0.0) {
                neighbors
                    .iter()
                    .map(|(d, _)| if *d == 0.0 { 1.0 } else { 0.0 })
                    .collect()
            } else {
                neighbors.iter().map(|(d, _)| 1.0 / d).collect()
            }
        }
    }
}

/// K-Nearest Neighbors Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNClassifier {
    config: KNNConfig,
    memory: Option<Memory>,
    classes: Vec<f64>,
}

impl KNNClassifier {
    pub fn new(config: KNNConfig) -> Self {
        Self {
            config,
            memory: None,
            classes: Vec::new(),
        }
    }

    pub fn with_k(k: usize) -> Self {
        Self::new(KNNConfig {
            n_neighbors: k,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &KNNConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let memory = Memory::fit(&self.config, x, y)?;
        let mut classes = y.to_vec();
        classes.sort_by(|a, b| a.total_cmp(b));
        classes.dedup();
        self.classes = classes;
        self.memory = Some(memory);
        Ok(self)
    }

    /// Weighted vote; tied classes resolve to the smallest label.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| WorkbenchError::Training("KNN classifier is not fitted".to_string()))?;
        memory.check_width(x)?;

        let predictions: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let neighbors = memory.nearest(x.row(i), &self.config);
                let weights = neighbor_weights(&neighbors, self.config.weights);
                let mut votes = vec![0.0; self.classes.len()];
                for ((_, label), w) in neighbors.iter().zip(weights) {
                    let k = self.classes.partition_point(|c| c < label);
                    if k < votes.len() {
                        votes[k] += w;
                    }
                }
                let mut best = 0;
                for (k, &v) in votes.iter().enumerate() {
                    if v > votes[best] {
                        best = k;
                    }
                }
                self.classes.get(best).copied().unwrap_or(f64::NAN)
            })
            .collect();

        Ok(Array1::from_vec(predictions))
    }
}

/// K-Nearest Neighbors Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNRegressor {
    config: KNNConfig,
    memory: Option<Memory>,
}

impl KNNRegressor {
    pub fn new(config: KNNConfig) -> Self {
        Self {
            config,
            memory: None,
        }
    }

    pub fn with_k(k: usize) -> Self {
        Self::new(KNNConfig {
            n_neighbors: k,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &KNNConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        self.memory = Some(Memory::fit(&self.config, x, y)?);
        Ok(self)
    }

    /// Weighted mean of neighbor targets
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| WorkbenchError::Training("KNN regressor is not fitted".to_string()))?;
        memory.check_width(x)?;

        let predictions: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let neighbors = memory.nearest(x.row(i), &self.config);
                let weights = neighbor_weights(&neighbors, self.config.weights);
                let total: f64 = weights.iter().sum();
                let weighted: f64 = neighbors.iter().zip(&weights).map(|((_, v), w)| v * w).sum();
                if total > 0.0 {
                    weighted / total
                } else {
                    f64::NAN
                }
            })
            .collect();

        Ok(Array1::from_vec(predictions))
    }
}
