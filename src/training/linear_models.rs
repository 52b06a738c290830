//! Linear model implementations

use crate::error::{Result, WorkbenchError};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Solve the symmetric positive-definite system `a x = b` by Cholesky
/// decomposition. A near-singular `a` gets a tiny ridge added once before
/// giving up.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    cholesky_factor(a)
        .or_else(|| {
            let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64;
            let mut a_reg = a.clone();
            for k in 0..n {
                a_reg[[k, k]] += ridge.max(1e-12);
            }
            cholesky_factor(&a_reg)
        })
        .map(|l| {
            // L y = b
            let mut y = Array1::zeros(n);
            for i in 0..n {
                let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
                y[i] = (b[i] - sum) / l[[i, i]];
            }
            // L^T x = y
            let mut x = Array1::zeros(n);
            for i in (0..n).rev() {
                let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
                x[i] = (y[i] - sum) / l[[i, i]];
            }
            x
        })
}

/// Lower-triangular `L` with `a = L L^T`, or `None` if `a` is not positive
/// definite or holds NaN.
fn cholesky_factor(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag.is_nan() || diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Least squares via the normal equations `(X^T X) w = X^T y`
fn solve_least_squares(x: &Array2<f64>, y: &Array1<f64>) -> Option<Array1<f64>> {
    let xtx = x.t().dot(x);
    let xty = x.t().dot(y);

    cholesky_solve(&xtx, &xty)
}

fn check_lengths(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(WorkbenchError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(WorkbenchError::Training(
            "cannot fit a linear model on zero samples".to_string(),
        ));
    }
    Ok(())
}

fn not_fitted(model: &str) -> WorkbenchError {
    WorkbenchError::Training(format!("{} is not fitted", model))
}

/// Ordinary least squares with intercept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearRegression {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit on centered data so the intercept falls out of the means
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        check_lengths(x, y)?;

        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| WorkbenchError::Training("empty feature matrix".to_string()))?;
        let y_mean = y.mean().unwrap_or(0.0);
        let x_centered = x - &x_mean.view().insert_axis(Axis(0));
        let y_centered = y - y_mean;

        let coefficients = solve_least_squares(&x_centered, &y_centered).ok_or_else(|| {
            WorkbenchError::Training(
                "singular matrix, cannot solve least squares".to_string(),
            )
        })?;

        self.intercept = Some(y_mean - coefficients.dot(&x_mean));
        self.coefficients = Some(coefficients);
        Ok(self)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self
            .coefficients
            .as_ref()
            .ok_or_else(|| not_fitted("linear regression"))?;
        Ok(x.dot(coefficients) + self.intercept.unwrap_or(0.0))
    }
}

/// Binary logistic regression fitted by batch gradient descent with an L2
/// penalty of strength `1 / c`. Labels must be 0 or 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Coefficients in the original feature space
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
    /// Inverse regularization strength
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub learning_rate: f64,
    /// Iterations used by the last fit
    pub n_iter: usize,
    pub converged: bool,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            c: 1.0,
            max_iter: 1000,
            tol: 1e-4,
            learning_rate: 0.5,
            n_iter: 0,
            converged: false,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    fn sigmoid(z: &Array1<f64>) -> Array1<f64> {
        z.mapv(|v| 1.0 / (1.0 + (-v).exp()))
    }

    /// Gradient descent runs on standardized features; the solution is mapped
    /// back to the caller's scale afterwards.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        check_lengths(x, y)?;
        let n_samples = x.nrows() as f64;

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| WorkbenchError::Training("empty feature matrix".to_string()))?;
        let std = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 { s } else { 1.0 });
        let z = (x - &mean.view().insert_axis(Axis(0))) / &std.view().insert_axis(Axis(0));

        let alpha = 1.0 / (self.c * n_samples);
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;
        self.converged = false;
        self.n_iter = 0;

        for iter in 0..self.max_iter {
            let predictions = Self::sigmoid(&(z.dot(&weights) + bias));
            let errors = &predictions - y;
            let dw = z.t().dot(&errors) / n_samples + alpha * &weights;
            let db = errors.mean().unwrap_or(0.0);

            self.n_iter = iter + 1;
            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                self.converged = true;
                break;
            }

            weights = weights - self.learning_rate * dw;
            bias -= self.learning_rate * db;
        }

        if !self.converged {
            warn!(
                max_iter = self.max_iter,
                "Logistic regression reached max_iterations before convergence"
            );
        }

        let coefficients = &weights / &std;
        self.intercept = Some(bias - coefficients.dot(&mean));
        self.coefficients = Some(coefficients);
        Ok(self)
    }

    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self
            .coefficients
            .as_ref()
            .ok_or_else(|| not_fitted("logistic regression"))?;
        Ok(x.dot(coefficients) + self.intercept.unwrap_or(0.0))
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(Self::sigmoid(&self.decision_function(x)?))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }
}

/// Logistic classifier over arbitrary labels: one binary model for two
/// classes, one-vs-rest otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticClassifier {
    pub max_iter: usize,
    /// Inverse regularization strength shared by every binary model
    pub c: f64,
    classes: Vec<f64>,
    models: Vec<LogisticRegression>,
}

impl LogisticClassifier {
    pub fn new(max_iter: usize) -> Self {
        Self {
            max_iter,
            c: 1.0,
            classes: Vec::new(),
            models: Vec::new(),
        }
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        check_lengths(x, y)?;
        let mut classes = y.to_vec();
        classes.sort_by(|a, b| a.total_cmp(b));
        classes.dedup();
        if classes.len() < 2 {
            return Err(WorkbenchError::Training(format!(
                "this solver needs samples of at least 2 classes in the data, but the data contains only one class: {}",
                classes.first().copied().unwrap_or(f64::NAN)
            )));
        }

        // Binary: a single model for the larger label
        let positives: Vec<f64> = if classes.len() == 2 {
            vec![classes[1]]
        } else {
            classes.clone()
        };

        let mut models = Vec::with_capacity(positives.len());
        for positive in positives {
            let target = y.mapv(|v| if v == positive { 1.0 } else { 0.0 });
            let mut model = LogisticRegression::new()
                .with_max_iter(self.max_iter)
                .with_c(self.c);
            model.fit(x, &target)?;
            models.push(model);
        }

        self.classes = classes;
        self.models = models;
        Ok(self)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.models.is_empty() {
            return Err(not_fitted("logistic classifier"));
        }

        if self.models.len() == 1 {
            let proba = self.models[0].predict_proba(x)?;
            return Ok(proba.mapv(|p| if p >= 0.5 { self.classes[1] } else { self.classes[0] }));
        }

        let scores = self
            .models
            .iter()
            .map(|m| m.decision_function(x))
            .collect::<Result<Vec<_>>>()?;
        Ok((0..x.nrows())
            .map(|i| {
                let mut best = 0;
                for k in 1..scores.len() {
                    if scores[k][i] > scores[best][i] {
                        best = k;
                    }
                }
                self.classes[best]
            })
            .collect())
    }

    /// First coefficient row: the positive class for binary, the first class
    /// otherwise.
    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.models.first().and_then(|m| m.coefficients.as_ref())
    }
}
