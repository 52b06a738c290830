//! Error types for the workbench pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for workbench operations
pub type Result<T> = std::result::Result<T, WorkbenchError>;

/// Main error type for the workbench pipeline
#[derive(Error, Debug)]
pub enum WorkbenchError {
    /// Malformed or insufficient dataset
    #[error("Validation error: {message}")]
    Validation { message: String, suggestion: String },

    /// Unusable feature/target choice
    #[error("Selection error: {message}")]
    Selection { message: String, suggestion: String },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Target column '{0}' is also listed as a feature")]
    TargetLeakage(String),

    #[error("No feature columns selected")]
    NoFeatures,

    #[error("Invalid train fraction {0}: must lie strictly between 0 and 1")]
    InvalidFraction(f64),

    #[error("Unknown model type: {0}")]
    UnknownModelType(String),

    #[error("Invalid hyperparameter: {name} = {value}, {reason}")]
    InvalidHyperparameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Preprocessing error: {0}")]
    Preprocessing(String),

    /// Underlying fit failure, message carries the original cause
    #[error("Training error: {0}")]
    Training(String),

    #[error("No trained model available for this session")]
    NoTrainedModel,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl WorkbenchError {
    pub fn validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        WorkbenchError::Validation {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn selection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        WorkbenchError::Selection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn invalid_hyperparameter(
        name: &str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        WorkbenchError::InvalidHyperparameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<polars::error::PolarsError> for WorkbenchError {
    fn from(err: polars::error::PolarsError) -> Self {
        WorkbenchError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for WorkbenchError {
    fn from(err: serde_json::Error) -> Self {
        WorkbenchError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for WorkbenchError {
    fn from(err: ndarray::ShapeError) -> Self {
        WorkbenchError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

/// User-facing rendering of a failure: what went wrong and what to do about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendlyError {
    pub message: String,
    pub suggestion: String,
}

/// (needles that must all match, message, suggestion); first match wins.
const ADVICE: &[(&[&[&str]], &str, &str)] = &[
    (
        &[&["utf-8"], &["decode"]],
        "File encoding error",
        "Try saving your CSV with UTF-8 encoding or use Excel format (.xlsx)",
    ),
    (
        &[&["delimiter"], &["separator"]],
        "CSV format error",
        "Make sure your file uses comma (,) as separator",
    ),
    (
        &[&["memory"]],
        "File too large",
        "Try uploading a smaller dataset or sampling your data",
    ),
    (
        &[&["could not convert"]],
        "Data type mismatch",
        "Check that numeric columns don't contain text values",
    ),
    (
        &[&["nan"], &["null"]],
        "Missing values detected",
        "Enable 'Handle Missing Values' in preprocessing options",
    ),
    (
        &[&["sample", "class"]],
        "Insufficient samples per class",
        "Each class needs at least 2 samples. Try collecting more data or combining small classes",
    ),
    (
        &[&["convergence"]],
        "Model didn't converge",
        "Try increasing max iterations in hyperparameters or scaling your features",
    ),
];

const GENERIC_MESSAGE: &str = "An error occurred";
const GENERIC_SUGGESTION: &str =
    "Please check your data format and try again. Contact support if the issue persists";

impl FriendlyError {
    /// Classify a raw failure message. Advisory only: unmatched messages get
    /// the generic pair.
    pub fn from_message(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        let hit = ADVICE.iter().find(|(alternatives, _, _)| {
            alternatives
                .iter()
                .any(|needles| needles.iter().all(|n| lowered.contains(n)))
        });

        match hit {
            Some((_, message, suggestion)) => Self {
                message: (*message).to_string(),
                suggestion: (*suggestion).to_string(),
            },
            None => Self {
                message: GENERIC_MESSAGE.to_string(),
                suggestion: GENERIC_SUGGESTION.to_string(),
            },
        }
    }

    /// Validation and selection errors already carry their own advice.
    pub fn from_error(err: &WorkbenchError) -> Self {
        match err {
            WorkbenchError::Validation { message, suggestion }
            | WorkbenchError::Selection { message, suggestion } => Self {
                message: message.clone(),
                suggestion: suggestion.clone(),
            },
            other => Self::from_message(&other.to_string()),
        }
    }
}
