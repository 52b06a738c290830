//! Support Vector Machine implementations
//!
//! The classifier uses simplified SMO (Sequential Minimal Optimization) with
//! one-vs-rest for more than two classes. The regressor runs dual coordinate
//! updates on the epsilon-insensitive loss.

use crate::error::{Result, WorkbenchError};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Above this many rows the precomputed kernel matrix gets too large.
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// Kernel function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    /// x · y
    Linear,
    /// (γ x · y + r)^d
    Poly,
    /// exp(-γ ||x - y||²)
    Rbf,
    /// tanh(γ x · y + r)
    Sigmoid,
}

impl FromStr for Kernel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Kernel::Linear),
            "poly" | "polynomial" => Ok(Kernel::Poly),
            "rbf" => Ok(Kernel::Rbf),
            "sigmoid" => Ok(Kernel::Sigmoid),
            other => Err(format!(
                "unknown kernel '{}', expected linear, rbf, poly or sigmoid",
                other
            )),
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kernel::Linear => "linear",
            Kernel::Poly => "poly",
            Kernel::Rbf => "rbf",
            Kernel::Sigmoid => "sigmoid",
        };
        f.write_str(name)
    }
}

/// Kernel coefficient for rbf, poly and sigmoid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gamma {
    /// 1 / (n_features * var(X))
    Scale,
    /// 1 / n_features
    Auto,
    Value(f64),
}

impl Gamma {
    fn resolve(&self, x: &Array2<f64>) -> f64 {
        let n_features = x.ncols().max(1) as f64;
        match *self {
            Gamma::Scale => {
                let var = x.var(0.0);
                if var > 0.0 {
                    1.0 / (n_features * var)
                } else {
                    1.0
                }
            }
            Gamma::Auto => 1.0 / n_features,
            Gamma::Value(g) => g,
        }
    }
}

/// SVM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMConfig {
    /// Regularization parameter
    pub c: f64,
    pub kernel: Kernel,
    pub gamma: Gamma,
    pub degree: u32,
    pub coef0: f64,
    /// Tolerance for the KKT check
    pub tol: f64,
    /// Maximum number of full passes over the data
    pub max_iter: usize,
    pub random_state: u64,
    /// SVR tube width
    pub epsilon: f64,
}

impl Default for SVMConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: Kernel::Rbf,
            gamma: Gamma::Scale,
            degree: 3,
            coef0: 0.0,
            tol: 1e-3,
            max_iter: 1000,
            random_state: 42,
            epsilon: 0.1,
        }
    }
}

/// Kernel with gamma resolved against the training data
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FittedKernel {
    kernel: Kernel,
    gamma: f64,
    degree: u32,
    coef0: f64,
}

impl FittedKernel {
    fn new(config: &SVMConfig, x: &Array2<f64>) -> Self {
        Self {
            kernel: config.kernel,
            gamma: config.gamma.resolve(x),
            degree: config.degree,
            coef0: config.coef0,
        }
    }

    fn eval(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.kernel {
            Kernel::Linear => a.dot(&b),
            Kernel::Poly => (self.gamma * a.dot(&b) + self.coef0).powi(self.degree as i32),
            Kernel::Rbf => {
                let norm_sq: f64 = a.iter().zip(b.iter()).map(|(p, q)| (p - q) * (p - q)).sum();
                (-self.gamma * norm_sq).exp()
            }
            Kernel::Sigmoid => (self.gamma * a.dot(&b) + self.coef0).tanh(),
        }
    }

    /// Symmetric Gram matrix, upper-triangle rows computed in parallel
    fn matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| (i..n).map(|j| self.eval(x.row(i), x.row(j))).collect())
            .collect();

        let mut k = Array2::zeros((n, n));
        for (i, row) in rows.into_iter().enumerate() {
            for (offset, val) in row.into_iter().enumerate() {
                let j = i + offset;
                k[[i, j]] = val;
                k[[j, i]] = val;
            }
        }
        k
    }
}

fn check_input(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(WorkbenchError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() > MAX_KERNEL_MATRIX_SAMPLES {
        return Err(WorkbenchError::Training(format!(
            "dataset has {} samples, exceeding the maximum {} for the SVM kernel matrix",
            x.nrows(),
            MAX_KERNEL_MATRIX_SAMPLES
        )));
    }
    Ok(())
}

/// One binary machine with labels in {-1, +1}
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinarySVM {
    support_vectors: Array2<f64>,
    /// alpha_i * y_i per support vector
    dual_coef: Array1<f64>,
    bias: f64,
}

impl BinarySVM {
    fn score(&self, kernel: &FittedKernel, sample: ArrayView1<f64>) -> f64 {
        self.support_vectors
            .outer_iter()
            .zip(self.dual_coef.iter())
            .map(|(sv, &coef)| coef * kernel.eval(sample, sv))
            .sum::<f64>()
            + self.bias
    }

    /// Primal weights, meaningful for the linear kernel only
    fn weights(&self) -> Array1<f64> {
        self.support_vectors.t().dot(&self.dual_coef)
    }
}

/// Support Vector Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMClassifier {
    config: SVMConfig,
    kernel: Option<FittedKernel>,
    classes: Vec<f64>,
    /// One machine for binary problems, one per class otherwise
    machines: Vec<BinarySVM>,
}

impl SVMClassifier {
    pub fn new(config: SVMConfig) -> Self {
        Self {
            config,
            kernel: None,
            classes: Vec::new(),
            machines: Vec::new(),
        }
    }

    pub fn config(&self) -> &SVMConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        check_input(x, y)?;

        let mut classes = y.to_vec();
        classes.sort_by(|a, b| a.total_cmp(b));
        classes.dedup();
        if classes.len() < 2 {
            return Err(WorkbenchError::Training(format!(
                "SVM needs samples of at least 2 classes, but the data contains {} class",
                classes.len()
            )));
        }

        let kernel = FittedKernel::new(&self.config, x);
        let gram = kernel.matrix(x);

        let positives: Vec<f64> = if classes.len() == 2 {
            vec![classes[1]]
        } else {
            classes.clone()
        };

        let mut machines = Vec::with_capacity(positives.len());
        for positive in positives {
            let y_binary = y.mapv(|v| if v == positive { 1.0 } else { -1.0 });
            machines.push(self.smo_train(x, &y_binary, &gram));
        }

        debug!(
            kernel = %self.config.kernel,
            gamma = kernel.gamma,
            n_machines = machines.len(),
            n_support = machines.iter().map(|m| m.dual_coef.len()).sum::<usize>(),
            "Fitted SVM classifier"
        );

        self.kernel = Some(kernel);
        self.classes = classes;
        self.machines = machines;
        Ok(self)
    }

    fn smo_train(&self, x: &Array2<f64>, y: &Array1<f64>, k: &Array2<f64>) -> BinarySVM {
        let n = x.nrows();
        let c = self.config.c;
        let tol = self.config.tol;
        let mut alphas = Array1::<f64>::zeros(n);
        let mut bias = 0.0;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);

        let decision = |alphas: &Array1<f64>, bias: f64, idx: usize| -> f64 {
            (0..n)
                .filter(|&i| alphas[i] > 0.0)
                .map(|i| alphas[i] * y[i] * k[[i, idx]])
                .sum::<f64>()
                + bias
        };

        let mut passes = 0;
        let max_passes = 5;
        let mut total_iter = 0;

        while n > 1 && passes < max_passes && total_iter < self.config.max_iter {
            let mut num_changed = 0;

            for i in 0..n {
                let e_i = decision(&alphas, bias, i) - y[i];
                let violates = (y[i] * e_i < -tol && alphas[i] < c) || (y[i] * e_i > tol && alphas[i] > 0.0);
                if !violates {
                    continue;
                }

                let j = loop {
                    let j = rng.gen_range(0..n);
                    if j != i {
                        break j;
                    }
                };
                let e_j = decision(&alphas, bias, j) - y[j];

                let alpha_i_old = alphas[i];
                let alpha_j_old = alphas[j];

                let (low, high) = if y[i] != y[j] {
                    ((alpha_j_old - alpha_i_old).max(0.0), (c + alpha_j_old - alpha_i_old).min(c))
                } else {
                    ((alpha_i_old + alpha_j_old - c).max(0.0), (alpha_i_old + alpha_j_old).min(c))
                };
                if (low - high).abs() < 1e-10 {
                    continue;
                }

                let eta = 2.0 * k[[i, j]] - k[[i, i]] - k[[j, j]];
                if eta >= 0.0 {
                    continue;
                }

                alphas[j] = (alpha_j_old - y[j] * (e_i - e_j) / eta).clamp(low, high);
                if (alphas[j] - alpha_j_old).abs() < 1e-5 {
                    continue;
                }
                alphas[i] = alpha_i_old + y[i] * y[j] * (alpha_j_old - alphas[j]);

                let b1 = bias
                    - e_i
                    - y[i] * (alphas[i] - alpha_i_old) * k[[i, i]]
                    - y[j] * (alphas[j] - alpha_j_old) * k[[i, j]];
                let b2 = bias
                    - e_j
                    - y[i] * (alphas[i] - alpha_i_old) * k[[i, j]]
                    - y[j] * (alphas[j] - alpha_j_old) * k[[j, j]];

                bias = if alphas[i] > 0.0 && alphas[i] < c {
                    b1
                } else if alphas[j] > 0.0 && alphas[j] < c {
                    b2
                } else {
                    (b1 + b2) / 2.0
                };

                num_changed += 1;
            }

            total_iter += 1;
            passes = if num_changed == 0 { passes + 1 } else { 0 };
        }

        let support: Vec<usize> = (0..n).filter(|&i| alphas[i] > 1e-8).collect();
        let mut support_vectors = Array2::zeros((support.len(), x.ncols()));
        let mut dual_coef = Array1::zeros(support.len());
        for (row, &idx) in support.iter().enumerate() {
            support_vectors.row_mut(row).assign(&x.row(idx));
            dual_coef[row] = alphas[idx] * y[idx];
        }

        BinarySVM {
            support_vectors,
            dual_coef,
            bias,
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let kernel = self
            .kernel
            .as_ref()
            .ok_or_else(|| WorkbenchError::Training("SVM classifier is not fitted".to_string()))?;

        let predictions = x
            .outer_iter()
            .map(|sample| {
                if self.machines.len() == 1 {
                    if self.machines[0].score(kernel, sample) >= 0.0 {
                        self.classes[1]
                    } else {
                        self.classes[0]
                    }
                } else {
                    let mut best = 0;
                    let mut best_score = f64::NEG_INFINITY;
                    for (k, machine) in self.machines.iter().enumerate() {
                        let score = machine.score(kernel, sample);
                        if score > best_score {
                            best_score = score;
                            best = k;
                        }
                    }
                    self.classes[best]
                }
            })
            .collect();
        Ok(predictions)
    }

    /// First row of the primal weights; `None` unless the kernel is linear.
    pub fn coefficients(&self) -> Option<Array1<f64>> {
        if self.config.kernel != Kernel::Linear {
            return None;
        }
        self.machines.first().map(BinarySVM::weights)
    }

    pub fn n_support_vectors(&self) -> usize {
        self.machines.iter().map(|m| m.dual_coef.len()).sum()
    }
}

/// Support Vector Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMRegressor {
    config: SVMConfig,
    kernel: Option<FittedKernel>,
    support_vectors: Array2<f64>,
    /// alpha - alpha* per support vector
    dual_coef: Array1<f64>,
    bias: f64,
}

impl SVMRegressor {
    pub fn new(config: SVMConfig) -> Self {
        Self {
            config,
            kernel: None,
            support_vectors: Array2::zeros((0, 0)),
            dual_coef: Array1::zeros(0),
            bias: 0.0,
        }
    }

    pub fn config(&self) -> &SVMConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        check_input(x, y)?;
        let n = x.nrows();
        if n == 0 {
            return Err(WorkbenchError::Training(
                "cannot fit SVM regressor on zero samples".to_string(),
            ));
        }

        let kernel = FittedKernel::new(&self.config, x);
        let k = kernel.matrix(x);
        let c = self.config.c;
        let epsilon = self.config.epsilon;
        let learning_rate = 0.01;

        let mut alphas = Array1::<f64>::zeros(n);
        let mut alphas_star = Array1::<f64>::zeros(n);
        let mut bias = 0.0;

        for _ in 0..self.config.max_iter {
            let mut max_change: f64 = 0.0;

            for i in 0..n {
                let pred = (0..n)
                    .map(|j| (alphas[j] - alphas_star[j]) * k[[j, i]])
                    .sum::<f64>()
                    + bias;
                let error = pred - y[i];

                if error > epsilon {
                    let updated = (alphas_star[i] + learning_rate).min(c);
                    max_change = max_change.max((updated - alphas_star[i]).abs());
                    alphas_star[i] = updated;
                } else if error < -epsilon {
                    let updated = (alphas[i] + learning_rate).min(c);
                    max_change = max_change.max((updated - alphas[i]).abs());
                    alphas[i] = updated;
                }

                let bias_step = learning_rate * 0.1 * error;
                max_change = max_change.max(bias_step.abs());
                bias -= bias_step;
            }

            if max_change < self.config.tol {
                break;
            }
        }

        let combined = &alphas - &alphas_star;
        let support: Vec<usize> = (0..n).filter(|&i| combined[i].abs() > 1e-8).collect();
        let mut support_vectors = Array2::zeros((support.len(), x.ncols()));
        let mut dual_coef = Array1::zeros(support.len());
        for (row, &idx) in support.iter().enumerate() {
            support_vectors.row_mut(row).assign(&x.row(idx));
            dual_coef[row] = combined[idx];
        }

        debug!(
            kernel = %self.config.kernel,
            n_support = support.len(),
            "Fitted SVM regressor"
        );

        self.kernel = Some(kernel);
        self.support_vectors = support_vectors;
        self.dual_coef = dual_coef;
        self.bias = bias;
        Ok(self)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let kernel = self
            .kernel
            .as_ref()
            .ok_or_else(|| WorkbenchError::Training("SVM regressor is not fitted".to_string()))?;

        Ok(x
            .outer_iter()
            .map(|sample| {
                self.support_vectors
                    .outer_iter()
                    .zip(self.dual_coef.iter())
                    .map(|(sv, &coef)| coef * kernel.eval(sample, sv))
                    .sum::<f64>()
                    + self.bias
            })
            .collect())
    }

    /// Primal weights; `None` unless the kernel is linear.
    pub fn coefficients(&self) -> Option<Array1<f64>> {
        if self.config.kernel != Kernel::Linear || self.kernel.is_none() {
            return None;
        }
        Some(self.support_vectors.t().dot(&self.dual_coef))
    }

    pub fn n_support_vectors(&self) -> usize {
        self.dual_coef.len()
    }
}
