//! Preprocessing configuration

use serde::{Deserialize, Serialize};
use super::{ImputeStrategy, ScalerType};

/// Options a user toggles before training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Fill missing feature values before encoding
    pub handle_missing: bool,

    /// Statistic used for numeric columns; text columns always use the mode
    pub missing_strategy: ImputeStrategy,

    /// Label-encode non-numeric feature columns
    pub encode_categories: bool,

    /// Zero mean, unit variance per feature
    pub standardization: bool,

    /// Min-max to [0, 1]; ignored when standardization is set
    pub normalization: bool,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            handle_missing: true,
            missing_strategy: ImputeStrategy::Mean,
            encode_categories: true,
            standardization: false,
            normalization: false,
        }
    }
}

impl PreprocessingConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle_missing(mut self, handle_missing: bool) -> Self {
        self.handle_missing = handle_missing;
        self
    }

    pub fn with_missing_strategy(mut self, strategy: ImputeStrategy) -> Self {
        self.missing_strategy = strategy;
        self
    }

    pub fn with_encode_categories(mut self, encode: bool) -> Self {
        self.encode_categories = encode;
        self
    }

    pub fn with_standardization(mut self, enabled: bool) -> Self {
        self.standardization = enabled;
        self
    }

    pub fn with_normalization(mut self, enabled: bool) -> Self {
        self.normalization = enabled;
        self
    }

    /// The single scaler this configuration resolves to.
    pub fn scaler_type(&self) -> ScalerType {
        if self.standardization {
            ScalerType::Standard
        } else if self.normalization {
            ScalerType::MinMax
        } else {
            ScalerType::None
        }
    }
}
