//! Structural sanity checks on an uploaded table

use super::missing_count;
use crate::config::ValidationConfig;
use crate::error::{Result, WorkbenchError};
use polars::prelude::*;
use std::collections::HashSet;
use tracing::debug;

/// Validate a dataset, stopping at the first failed check.
///
/// Order: empty, row count, all-missing, worst column missing share, column
/// count, duplicate headers, unnamed headers.
pub fn validate(df: &DataFrame, config: &ValidationConfig) -> Result<()> {
    let rows = df.height();
    if rows == 0 || df.width() == 0 {
        return Err(WorkbenchError::validation(
            "Dataset is empty",
            "Please upload a file with data rows",
        ));
    }

    if rows < config.min_rows {
        return Err(WorkbenchError::validation(
            format!("Dataset has only {} rows", rows),
            format!(
                "ML models need at least {} samples. Please upload a larger dataset",
                config.min_rows
            ),
        ));
    }

    let mut worst: Option<(String, usize)> = None;
    let mut total_missing = 0usize;
    for column in df.get_columns() {
        let missing = missing_count(column)?;
        total_missing += missing;
        if worst.as_ref().map_or(true, |(_, m)| missing > *m) {
            worst = Some((column.name().to_string(), missing));
        }
    }

    if total_missing == rows * df.width() {
        return Err(WorkbenchError::validation(
            "All columns contain only missing values",
            "Please check your data file for valid entries",
        ));
    }

    if let Some((name, missing)) = worst {
        let pct = missing as f64 / rows as f64 * 100.0;
        if pct > config.max_missing_pct {
            return Err(WorkbenchError::validation(
                format!("Column '{}' has {:.1}% missing values", name, pct),
                "Consider removing columns with too many missing values or use imputation",
            ));
        }
    }

    if df.width() < config.min_columns {
        return Err(WorkbenchError::validation(
            format!("Dataset must have at least {} columns", config.min_columns),
            "You need at least one input feature and one target variable",
        ));
    }

    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    validate_columns(&names)?;

    debug!(rows, columns = df.width(), "Dataset passed validation");
    Ok(())
}

/// Header checks: duplicates first, then unnamed placeholders.
///
/// Exposed separately because a `DataFrame` cannot hold duplicate names; an
/// ingestion layer that keeps the raw header row can check it here.
pub fn validate_columns<S: AsRef<str>>(names: &[S]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<&str> = Vec::new();
    for name in names {
        let name = name.as_ref();
        if !seen.insert(name) && !duplicates.contains(&name) {
            duplicates.push(name);
        }
    }
    if !duplicates.is_empty() {
        return Err(WorkbenchError::validation(
            format!("Duplicate column names found: {}", duplicates.join(", ")),
            "Please rename duplicate columns in your CSV file",
        ));
    }

    let unnamed: Vec<&str> = names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| name.contains("Unnamed") || name.trim().is_empty())
        .collect();
    if !unnamed.is_empty() {
        return Err(WorkbenchError::validation(
            format!("Found unnamed columns: {}", unnamed.join(", ")),
            "Please add column headers to your CSV file",
        ));
    }

    Ok(())
}
