//! Missing value imputation strategies

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Strategy for imputing missing numeric values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    /// Replace with mean
    #[default]
    Mean,
    /// Replace with median
    Median,
    /// Replace with mode / most frequent value
    MostFrequent,
}

/// Fitted replacement for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImputeValue {
    Numeric(f64),
    Text(String),
}

/// Computes fill values from observed entries only
#[derive(Debug, Clone)]
pub struct Imputer {
    strategy: ImputeStrategy,
}

impl Imputer {
    /// Create a new imputer with the specified strategy
    pub fn new(strategy: ImputeStrategy) -> Self {
        Self { strategy }
    }

    /// `None` when the column has no observed values at all.
    pub fn fit_numeric(&self, values: &[Option<f64>]) -> Option<ImputeValue> {
        let mut observed: Vec<f64> = values.iter().flatten().copied().collect();
        if observed.is_empty() {
            return None;
        }

        let fill = match self.strategy {
            ImputeStrategy::Mean => observed.iter().sum::<f64>() / observed.len() as f64,
            ImputeStrategy::Median => {
                observed.sort_by(|a, b| a.total_cmp(b));
                let mid = observed.len() / 2;
                if observed.len() % 2 == 0 {
                    (observed[mid - 1] + observed[mid]) / 2.0
                } else {
                    observed[mid]
                }
            }
            ImputeStrategy::MostFrequent => mode_numeric(&observed)?,
        };
        Some(ImputeValue::Numeric(fill))
    }

    /// Text columns ignore the configured strategy and use the mode.
    pub fn fit_text(&self, values: &[Option<String>]) -> Option<ImputeValue> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in values.iter().flatten() {
            *counts.entry(value.as_str()).or_insert(0) += 1;
        }
        // Ties resolve to the smallest value
        counts
            .into_iter()
            .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.cmp(a)))
            .map(|(value, _)| ImputeValue::Text(value.to_string()))
    }
}

fn mode_numeric(observed: &[f64]) -> Option<f64> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for value in observed {
        *counts.entry(value.to_bits()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(bits, count)| (f64::from_bits(bits), count))
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.total_cmp(a)))
        .map(|(value, _)| value)
}

/// Replace missing entries in place.
pub fn fill_numeric(values: &mut [Option<f64>], fill: f64) {
    for value in values.iter_mut().filter(|v| v.is_none()) {
        *value = Some(fill);
    }
}

pub fn fill_text(values: &mut [Option<String>], fill: &str) {
    for value in values.iter_mut().filter(|v| v.is_none()) {
        *value = Some(fill.to_string());
    }
}
