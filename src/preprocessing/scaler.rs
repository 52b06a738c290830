//! Feature scaling implementations

use crate::error::{Result, WorkbenchError};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Type of scaler to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerType {
    /// Standard scaling (z-score normalization): (x - mean) / std
    Standard,
    /// Min-Max scaling: (x - min) / (max - min)
    MinMax,
    /// No scaling
    None,
}

/// Parameters for one fitted column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    /// mean or min
    pub center: f64,
    /// population std or range; never zero
    pub scale: f64,
}

impl ScalerParams {
    const IDENTITY: ScalerParams = ScalerParams {
        center: 0.0,
        scale: 1.0,
    };
}

/// Column-wise scaler over a dense feature matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    scaler_type: ScalerType,
    params: Vec<ScalerParams>,
}

impl Scaler {
    /// Fit one set of parameters per column of `x`.
    pub fn fit(scaler_type: ScalerType, x: &Array2<f64>) -> Self {
        let params = x
            .axis_iter(Axis(1))
            .map(|column| compute_params(scaler_type, column))
            .collect();
        Self {
            scaler_type,
            params,
        }
    }

    pub fn scaler_type(&self) -> ScalerType {
        self.scaler_type
    }

    pub fn params(&self) -> &[ScalerParams] {
        &self.params
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.params.len() {
            return Err(WorkbenchError::ShapeError {
                expected: format!("{} columns", self.params.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }

        let mut scaled = x.clone();
        for (mut column, params) in scaled.axis_iter_mut(Axis(1)).zip(&self.params) {
            column.mapv_inplace(|v| (v - params.center) / params.scale);
        }
        Ok(scaled)
    }

    /// Fit and transform in one step
    pub fn fit_transform(scaler_type: ScalerType, x: &Array2<f64>) -> Result<(Self, Array2<f64>)> {
        let scaler = Self::fit(scaler_type, x);
        let scaled = scaler.transform(x)?;
        Ok((scaler, scaled))
    }
}

fn compute_params(scaler_type: ScalerType, column: ArrayView1<f64>) -> ScalerParams {
    if column.is_empty() {
        return ScalerParams::IDENTITY;
    }

    match scaler_type {
        ScalerType::Standard => {
            let mean = column.mean().unwrap_or(0.0);
            let std = column.std(0.0);
            ScalerParams {
                center: mean,
                scale: if std == 0.0 { 1.0 } else { std },
            }
        }
        ScalerType::MinMax => {
            let min = column.iter().copied().fold(f64::INFINITY, f64::min);
            let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let range = max - min;
            ScalerParams {
                center: min,
                scale: if range == 0.0 { 1.0 } else { range },
            }
        }
        ScalerType::None => ScalerParams::IDENTITY,
    }
}
