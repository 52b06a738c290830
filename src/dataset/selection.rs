//! Feature/target choice checks, run before any preprocessing

use super::{distinct_count, is_numeric_dtype};
use crate::error::{Result, WorkbenchError};
use polars::prelude::*;

const MAX_CLASSES: usize = 100;

/// Check a user's feature and target selection against the dataset.
pub fn validate_selection<S: AsRef<str>>(df: &DataFrame, features: &[S], target: &str) -> Result<()> {
    let has = |name: &str| df.get_column_names().iter().any(|c| c.as_str() == name);

    let missing: Vec<&str> = features
        .iter()
        .map(AsRef::as_ref)
        .filter(|f| !has(f))
        .collect();
    if !missing.is_empty() {
        return Err(WorkbenchError::selection(
            format!("Features not found: {}", missing.join(", ")),
            "Please select valid column names from your dataset",
        ));
    }

    if !has(target) {
        return Err(WorkbenchError::selection(
            format!("Target variable '{}' not found", target),
            "Please select a valid target column",
        ));
    }

    if features.iter().any(|f| f.as_ref() == target) {
        return Err(WorkbenchError::selection(
            "Target variable cannot be an input feature",
            "Remove the target variable from your feature selection",
        ));
    }

    if features.is_empty() {
        return Err(WorkbenchError::selection(
            "No input features selected",
            "Please select at least one feature column",
        ));
    }

    let target_column = df.column(target)?;
    let n_classes = distinct_count(target_column)?;
    if n_classes < 2 {
        return Err(WorkbenchError::selection(
            format!("Target variable '{}' has only one unique value", target),
            "Target must have at least 2 different values for classification or range of values for regression",
        ));
    }

    if !is_numeric_dtype(target_column.dtype()) && n_classes > MAX_CLASSES {
        return Err(WorkbenchError::selection(
            format!("Target has {} unique classes", n_classes),
            "Too many classes for classification. Consider grouping categories or using regression",
        ));
    }

    let mut constant = Vec::new();
    for feature in features.iter().map(AsRef::as_ref) {
        let column = df.column(feature)?;
        if is_numeric_dtype(column.dtype()) && distinct_count(column)? == 1 {
            constant.push(feature);
        }
    }
    if !constant.is_empty() {
        return Err(WorkbenchError::selection(
            format!("Features with no variance: {}", constant.join(", ")),
            "Remove constant features as they don't provide information",
        ));
    }

    Ok(())
}
