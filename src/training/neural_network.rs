//! Neural Network (Multi-Layer Perceptron) implementation
//!
//! Feed-forward network trained by mini-batch SGD with momentum. Inputs are
//! standardized internally, as is the regression target, so raw tabular
//! features can be fed directly.

use crate::error::{Result, WorkbenchError};
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

/// Hidden layer activation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    ReLU,
    Sigmoid,
    Tanh,
}

impl Activation {
    fn apply(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Tanh => z.mapv(f64::tanh),
        }
    }

    fn derivative(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Sigmoid => z.mapv(|v| {
                let s = 1.0 / (1.0 + (-v).exp());
                s * (1.0 - s)
            }),
            Activation::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
        }
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "relu" => Ok(Activation::ReLU),
            "logistic" | "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            other => Err(format!("unknown activation '{}', expected relu, logistic or tanh", other)),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPConfig {
    pub hidden_layers: Vec<usize>,
    pub activation: Activation,
    pub learning_rate: f64,
    /// Maximum number of epochs
    pub max_epochs: usize,
    pub batch_size: usize,
    /// L2 penalty
    pub alpha: f64,
    pub random_state: u64,
    /// Epochs without `tol` improvement in training loss before stopping
    pub n_iter_no_change: usize,
    pub tol: f64,
    pub momentum: f64,
}

impl Default for MLPConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![100],
            activation: Activation::ReLU,
            learning_rate: 0.001,
            max_epochs: 500,
            batch_size: 32,
            alpha: 0.0001,
            random_state: 42,
            n_iter_no_change: 10,
            tol: 1e-4,
            momentum: 0.9,
        }
    }
}

/// Output layer and loss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum Output {
    /// Identity output, squared error
    Linear,
    /// Softmax output, cross-entropy
    Softmax,
}

/// Per-feature standardization learned at fit
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InputScaling {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl InputScaling {
    fn fit(x: &Array2<f64>) -> Result<Self> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| WorkbenchError::Training("empty feature matrix".to_string()))?;
        let std = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 { s } else { 1.0 });
        Ok(Self { mean, std })
    }

    fn apply(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean.view().insert_axis(Axis(0))) / &self.std.view().insert_axis(Axis(0))
    }
}

/// Layers plus the training loop shared by classifier and regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Network {
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    activation: Activation,
    output: Output,
}

impl Network {
    /// Glorot uniform initialization
    fn new(layer_sizes: &[usize], activation: Activation, output: Output, rng: &mut Xoshiro256PlusPlus) -> Self {
        let mut weights = Vec::with_capacity(layer_sizes.len() - 1);
        let mut biases = Vec::with_capacity(layer_sizes.len() - 1);
        for pair in layer_sizes.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            let limit = (6.0 / (n_in + n_out) as f64).sqrt();
            weights.push(Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-limit..limit)));
            biases.push(Array1::zeros(n_out));
        }
        Self {
            weights,
            biases,
            activation,
            output,
        }
    }

    fn softmax(z: &mut Array2<f64>) {
        for mut row in z.rows_mut() {
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
    }

    /// Activations per layer (input first) and pre-activations per layer
    fn forward(&self, x: &Array2<f64>) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let mut activations = vec![x.clone()];
        let mut z_values = Vec::with_capacity(self.weights.len());
        let last = self.weights.len() - 1;

        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let z = activations[i].dot(w) + b;
            let a = if i < last {
                self.activation.apply(&z)
            } else {
                match self.output {
                    Output::Linear => z.clone(),
                    Output::Softmax => {
                        let mut a = z.clone();
                        Self::softmax(&mut a);
                        a
                    }
                }
            };
            z_values.push(z);
            activations.push(a);
        }
        (activations, z_values)
    }

    fn output(&self, x: &Array2<f64>) -> Array2<f64> {
        let (mut activations, _) = self.forward(x);
        activations.pop().unwrap_or_else(|| Array2::zeros((x.nrows(), 0)))
    }

    fn loss(&self, output: &Array2<f64>, target: &Array2<f64>) -> f64 {
        let n = output.nrows().max(1) as f64;
        match self.output {
            Output::Linear => (output - target).mapv(|v| v * v).sum() / (2.0 * n),
            Output::Softmax => {
                -output
                    .iter()
                    .zip(target.iter())
                    .filter(|(_, &t)| t > 0.0)
                    .map(|(&p, _)| p.max(1e-12).ln())
                    .sum::<f64>()
                    / n
            }
        }
    }

    /// Gradients per layer. Both losses give `output - target` at the top.
    fn backward(&self, activations: &[Array2<f64>], z_values: &[Array2<f64>], target: &Array2<f64>) -> Vec<(Array2<f64>, Array1<f64>)> {
        let n = target.nrows() as f64;
        let mut delta = (&activations[activations.len() - 1] - target) / n;
        let mut gradients = Vec::with_capacity(self.weights.len());

        for i in (0..self.weights.len()).rev() {
            let grad_w = activations[i].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            gradients.push((grad_w, grad_b));
            if i > 0 {
                delta = delta.dot(&self.weights[i].t()) * self.activation.derivative(&z_values[i - 1]);
            }
        }
        gradients.reverse();
        gradients
    }

    /// Mini-batch SGD with momentum. Stops once the epoch loss has failed to
    /// improve by `tol` for `n_iter_no_change` epochs.
    fn train(&mut self, x: &Array2<f64>, target: &Array2<f64>, config: &MLPConfig, rng: &mut Xoshiro256PlusPlus) -> Result<usize> {
        let n_samples = x.nrows();
        let batch_size = config.batch_size.clamp(1, n_samples.max(1));
        let mut velocity_w: Vec<Array2<f64>> = self.weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect();
        let mut velocity_b: Vec<Array1<f64>> = self.biases.iter().map(|b| Array1::zeros(b.len())).collect();

        let mut best_loss = f64::INFINITY;
        let mut stale_epochs = 0;
        let mut indices: Vec<usize> = (0..n_samples).collect();

        for epoch in 0..config.max_epochs {
            indices.shuffle(rng);

            for batch in indices.chunks(batch_size) {
                let x_batch = x.select(Axis(0), batch);
                let t_batch = target.select(Axis(0), batch);

                let (activations, z_values) = self.forward(&x_batch);
                let gradients = self.backward(&activations, &z_values, &t_batch);

                for (i, (grad_w, grad_b)) in gradients.into_iter().enumerate() {
                    let grad_w = grad_w + &self.weights[i] * config.alpha;
                    velocity_w[i] = &velocity_w[i] * config.momentum - grad_w * config.learning_rate;
                    velocity_b[i] = &velocity_b[i] * config.momentum - grad_b * config.learning_rate;
                    self.weights[i] += &velocity_w[i];
                    self.biases[i] += &velocity_b[i];
                }
            }

            let loss = self.loss(&self.output(x), target);
            if !loss.is_finite() {
                return Err(WorkbenchError::Training(format!(
                    "neural network diverged at epoch {}; try a smaller learning_rate",
                    epoch + 1
                )));
            }

            if loss > best_loss - config.tol {
                stale_epochs += 1;
                if stale_epochs >= config.n_iter_no_change {
                    debug!(epoch = epoch + 1, loss, "Training loss stopped improving");
                    return Ok(epoch + 1);
                }
            } else {
                stale_epochs = 0;
            }
            best_loss = best_loss.min(loss);
        }

        warn!(
            max_iterations = config.max_epochs,
            "Neural network reached max_iterations before convergence"
        );
        Ok(config.max_epochs)
    }
}

fn layer_sizes(n_in: usize, hidden: &[usize], n_out: usize) -> Vec<usize> {
    let mut sizes = Vec::with_capacity(hidden.len() + 2);
    sizes.push(n_in);
    sizes.extend(hidden.iter().copied().filter(|&h| h > 0));
    sizes.push(n_out);
    sizes
}

fn check_input(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(WorkbenchError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(WorkbenchError::Training(
            "cannot fit a neural network on zero samples".to_string(),
        ));
    }
    Ok(())
}

/// Multi-Layer Perceptron Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPRegressor {
    config: MLPConfig,
    network: Option<Network>,
    scaling: Option<InputScaling>,
    y_mean: f64,
    y_std: f64,
    n_iter: usize,
}

impl MLPRegressor {
    pub fn new(config: MLPConfig) -> Self {
        Self {
            config,
            network: None,
            scaling: None,
            y_mean: 0.0,
            y_std: 1.0,
            n_iter: 0,
        }
    }

    pub fn config(&self) -> &MLPConfig {
        &self.config
    }

    /// Epochs run by the last fit
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        check_input(x, y)?;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);

        let scaling = InputScaling::fit(x)?;
        let x_scaled = scaling.apply(x);
        let y_mean = y.mean().unwrap_or(0.0);
        let y_std = Some(y.std(0.0)).filter(|s| *s > 0.0).unwrap_or(1.0);
        let target = y.mapv(|v| (v - y_mean) / y_std).insert_axis(Axis(1));

        let sizes = layer_sizes(x.ncols(), &self.config.hidden_layers, 1);
        let mut network = Network::new(&sizes, self.config.activation, Output::Linear, &mut rng);
        self.n_iter = network.train(&x_scaled, &target, &self.config, &mut rng)?;

        self.network = Some(network);
        self.scaling = Some(scaling);
        self.y_mean = y_mean;
        self.y_std = y_std;
        Ok(self)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (network, scaling) = self
            .network
            .as_ref()
            .zip(self.scaling.as_ref())
            .ok_or_else(|| WorkbenchError::Training("neural network is not fitted".to_string()))?;
        if x.ncols() != scaling.mean.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} features", scaling.mean.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        let output = network.output(&scaling.apply(x));
        Ok(output.column(0).mapv(|v| v * self.y_std + self.y_mean))
    }
}

/// Multi-Layer Perceptron Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPClassifier {
    config: MLPConfig,
    network: Option<Network>,
    scaling: Option<InputScaling>,
    classes: Vec<f64>,
    n_iter: usize,
}

impl MLPClassifier {
    pub fn new(config: MLPConfig) -> Self {
        Self {
            config,
            network: None,
            scaling: None,
            classes: Vec::new(),
            n_iter: 0,
        }
    }

    pub fn config(&self) -> &MLPConfig {
        &self.config
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        check_input(x, y)?;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);

        let mut classes = y.to_vec();
        classes.sort_by(|a, b| a.total_cmp(b));
        classes.dedup();

        let mut onehot = Array2::zeros((y.len(), classes.len()));
        for (i, label) in y.iter().enumerate() {
            let k = classes.partition_point(|c| c < label);
            onehot[[i, k]] = 1.0;
        }

        let scaling = InputScaling::fit(x)?;
        let x_scaled = scaling.apply(x);
        let sizes = layer_sizes(x.ncols(), &self.config.hidden_layers, classes.len());
        let mut network = Network::new(&sizes, self.config.activation, Output::Softmax, &mut rng);
        self.n_iter = network.train(&x_scaled, &onehot, &self.config, &mut rng)?;

        self.network = Some(network);
        self.scaling = Some(scaling);
        self.classes = classes;
        Ok(self)
    }

    /// Class probabilities, columns in ascending label order
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (network, scaling) = self
            .network
            .as_ref()
            .zip(self.scaling.as_ref())
            .ok_or_else(|| WorkbenchError::Training("neural network is not fitted".to_string()))?;
        if x.ncols() != scaling.mean.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} features", scaling.mean.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(network.output(&scaling.apply(x)))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .outer_iter()
            .map(|row| {
                let mut best = 0;
                for (k, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = k;
                    }
                }
                self.classes.get(best).copied().unwrap_or(f64::NAN)
            })
            .collect())
    }

    pub fn classes(&self) -> &[f64] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Array2<f64> {
        Array2::from_shape_vec((100, 2), (0..200).map(|i| i as f64 * 0.05).collect()).unwrap()
    }

    #[test]
    fn test_regressor() {
        let x = grid();
        let y: Array1<f64> = x.rows().into_iter().map(|r| r[0] * 2.0 + r[1] + 0.5).collect();

        let config = MLPConfig {
            hidden_layers: vec![32, 16],
            ..Default::default()
        };
        let mut mlp = MLPRegressor::new(config);
        mlp.fit(&x, &y).unwrap();

        let predictions = mlp.predict(&x).unwrap();
        let mse = (&predictions - &y).mapv(|v| v * v).mean().unwrap();
        assert!(mse < y.var(0.0) * 0.25, "mse {} vs variance {}", mse, y.var(0.0));
    }

    #[test]
    fn test_regressor_large_scale_target() {
        // Income-sized values must not blow up training
        let x = Array2::from_shape_fn((60, 1), |(i, _)| 20_000.0 + 1_000.0 * i as f64);
        let y = x.column(0).mapv(|v| 3.0 * v);
        let mut mlp = MLPRegressor::new(MLPConfig::default());
        mlp.fit(&x, &y).unwrap();
        assert!(mlp.predict(&x).unwrap().iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_classifier() {
        let x = grid();
        let y: Array1<f64> = x
            .rows()
            .into_iter()
            .map(|r| if r[0] + r[1] > 5.0 { 1.0 } else { 0.0 })
            .collect();

        let config = MLPConfig {
            hidden_layers: vec![32, 16],
            learning_rate: 0.01,
            ..Default::default()
        };
        let mut mlp = MLPClassifier::new(config);
        mlp.fit(&x, &y).unwrap();

        let predictions = mlp.predict(&x).unwrap();
        let correct = y.iter().zip(predictions.iter()).filter(|(a, b)| a == b).count();
        assert!(correct as f64 / 100.0 > 0.8, "accuracy {}", correct);

        let proba = mlp.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 2);
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_deterministic() {
        let x = grid();
        let y: Array1<f64> = (0..100).map(|i| (i % 3) as f64).collect();
        let config = MLPConfig {
            hidden_layers: vec![8],
            max_epochs: 20,
            ..Default::default()
        };
        let mut a = MLPClassifier::new(config.clone());
        let mut b = MLPClassifier::new(config);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_activation_functions() {
        let z = Array2::from_shape_vec((1, 3), vec![-1.0, 0.0, 1.0]).unwrap();
        assert_eq!(Activation::ReLU.apply(&z)[[0, 0]], 0.0);
        assert_eq!(Activation::ReLU.apply(&z)[[0, 2]], 1.0);
        assert!((Activation::Sigmoid.apply(&z)[[0, 1]] - 0.5).abs() < 1e-12);
        assert!((Activation::Tanh.derivative(&z)[[0, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_activation_parsing() {
        assert_eq!("logistic".parse::<Activation>().unwrap(), Activation::Sigmoid);
        assert_eq!("Tanh".parse::<Activation>().unwrap(), Activation::Tanh);
        assert!("softplus".parse::<Activation>().is_err());
    }

    #[test]
    fn test_unfitted_predict_fails() {
        let mlp = MLPRegressor::new(MLPConfig::default());
        assert!(mlp.predict(&Array2::zeros((1, 2))).is_err());
    }
}
