//! Data preprocessing module
//!
//! Turns a user's feature/target selection into numeric training data:
//! - Missing value imputation (mean, median, most frequent)
//! - Label encoding of non-numeric columns and targets
//! - Feature scaling (standardization or min-max normalization)
//!
//! The fitted state is returned as a plain serializable value so prediction
//! can replay exactly what training saw.

mod config;
mod encoder;
mod imputer;
mod pipeline;
mod scaler;

pub use config::PreprocessingConfig;
pub use encoder::LabelEncoding;
pub use imputer::{ImputeStrategy, ImputeValue, Imputer};
pub use pipeline::{DataPreprocessor, FittedTransformState, TargetKind, TargetVector};
pub use scaler::{Scaler, ScalerParams, ScalerType};
