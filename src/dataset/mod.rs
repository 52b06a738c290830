//! Dataset inspection module
//!
//! Everything that looks at the raw uploaded table before any transformation:
//! - Structural validation with remediation suggestions
//! - Semantic column typing (numeric / categorical / text)
//! - Per-column summaries and the upload profile
//! - Feature/target selection checks

mod inference;
mod selection;
mod validator;

pub use inference::{
    detect_problem_type, infer, profile, summarize_column, ColumnSummary, DatasetProfile,
    NarrationContext, ProblemType, SemanticType, ValueCount,
};
pub use selection::validate_selection;
pub use validator::{validate, validate_columns};

use crate::error::{Result, WorkbenchError};
use polars::prelude::*;
use std::collections::HashSet;

/// Integer, float and boolean dtypes count as numerically typed.
pub(crate) fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

pub(crate) fn is_float_dtype(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Float32 | DataType::Float64)
}

/// Column as f64 with nulls and NaNs both reported as `None`.
///
/// Values that are present but do not parse as numbers are an error, not
/// missing values.
pub(crate) fn numeric_values(column: &Column) -> Result<Vec<Option<f64>>> {
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    let unparsed = series.null_count().saturating_sub(column.null_count());
    if unparsed > 0 {
        return Err(WorkbenchError::Preprocessing(format!(
            "could not convert string to float: column '{}' has {} value(s) that are not numbers",
            column.name(),
            unparsed
        )));
    }
    Ok(series
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

/// Column rendered as strings, nulls as `None`.
pub(crate) fn string_values(column: &Column) -> Result<Vec<Option<String>>> {
    let series = column.as_materialized_series().cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

pub(crate) fn missing_count(column: &Column) -> Result<usize> {
    if is_float_dtype(column.dtype()) {
        Ok(numeric_values(column)?.iter().filter(|v| v.is_none()).count())
    } else {
        Ok(column.null_count())
    }
}

/// Distinct non-missing values.
pub(crate) fn distinct_count(column: &Column) -> Result<usize> {
    if is_numeric_dtype(column.dtype()) {
        let seen: HashSet<u64> = numeric_values(column)?
            .into_iter()
            .flatten()
            .map(|v| if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() })
            .collect();
        Ok(seen.len())
    } else {
        let seen: HashSet<String> = string_values(column)?.into_iter().flatten().collect();
        Ok(seen.len())
    }
}
