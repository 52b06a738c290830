//! Semantic column typing and per-column summaries

use super::{distinct_count, is_numeric_dtype, missing_count, numeric_values, string_values};
use crate::error::Result;
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

const PREVIEW_ROWS: usize = 10;
const TOP_VALUES: usize = 5;

/// Semantic type shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Numeric,
    Categorical,
    Text,
}

/// Kind of supervised problem a target column implies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemType {
    Classification,
    Regression,
}

/// Classify a column. Numerically typed columns are numeric; otherwise a
/// column with fewer than 10 distinct values that also stays under half the
/// row count is categorical, and anything else is free text.
pub fn infer(column: &Column) -> Result<SemanticType> {
    if is_numeric_dtype(column.dtype()) {
        return Ok(SemanticType::Numeric);
    }

    let unique = distinct_count(column)? as f64;
    let total = column.len() as f64;
    if unique < total * 0.5 && unique < 10.0 {
        Ok(SemanticType::Categorical)
    } else {
        Ok(SemanticType::Text)
    }
}

/// Guess the problem type a would-be target column implies.
///
/// Numeric targets with under 20 distinct values, or a distinct ratio under
/// 5%, are treated as encoded class labels.
pub fn detect_problem_type(column: &Column) -> Result<ProblemType> {
    if !is_numeric_dtype(column.dtype()) {
        return Ok(ProblemType::Classification);
    }

    let unique = distinct_count(column)?;
    let total = column.len().max(1);
    if unique < 20 || (unique as f64 / total as f64) < 0.05 {
        Ok(ProblemType::Classification)
    } else {
        Ok(ProblemType::Regression)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// UI preview statistics for one column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
    pub missing_count: usize,
    pub missing_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_values: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_values: Option<Vec<ValueCount>>,
}

pub fn summarize_column(column: &Column) -> Result<ColumnSummary> {
    let semantic_type = infer(column)?;
    let missing = missing_count(column)?;
    let rows = column.len();

    let mut summary = ColumnSummary {
        name: column.name().to_string(),
        semantic_type,
        missing_count: missing,
        missing_percentage: if rows == 0 {
            0.0
        } else {
            missing as f64 / rows as f64 * 100.0
        },
        min: None,
        max: None,
        mean: None,
        unique_values: None,
        top_values: None,
    };

    match semantic_type {
        SemanticType::Numeric => {
            let observed: Vec<f64> = numeric_values(column)?.into_iter().flatten().collect();
            if !observed.is_empty() {
                summary.min = observed.iter().copied().reduce(f64::min);
                summary.max = observed.iter().copied().reduce(f64::max);
                summary.mean = Some(observed.iter().sum::<f64>() / observed.len() as f64);
            }
        }
        SemanticType::Categorical => {
            let values = string_values(column)?;
            let mut counts: HashMap<String, usize> = HashMap::new();
            for value in values.into_iter().flatten() {
                *counts.entry(value).or_insert(0) += 1;
            }
            summary.unique_values = Some(counts.len());

            let mut ranked: Vec<ValueCount> = counts
                .into_iter()
                .map(|(value, count)| ValueCount { value, count })
                .collect();
            ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
            ranked.truncate(TOP_VALUES);
            summary.top_values = Some(ranked);
        }
        SemanticType::Text => {}
    }

    Ok(summary)
}

/// Everything the upload step reports back about a freshly loaded table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub rows: usize,
    pub columns: Vec<String>,
    pub column_info: Vec<ColumnSummary>,
    /// First rows, cells aligned with `columns`
    pub preview: Vec<Vec<serde_json::Value>>,
}

pub fn profile(df: &DataFrame) -> Result<DatasetProfile> {
    let column_info = df
        .get_columns()
        .par_iter()
        .map(summarize_column)
        .collect::<Result<Vec<_>>>()?;

    let head = df.head(Some(PREVIEW_ROWS));
    let rendered = head
        .get_columns()
        .iter()
        .map(preview_cells)
        .collect::<Result<Vec<_>>>()?;
    let preview = (0..head.height())
        .map(|row| rendered.iter().map(|cells| cells[row].clone()).collect())
        .collect();

    debug!(rows = df.height(), columns = df.width(), "Profiled dataset");

    Ok(DatasetProfile {
        rows: df.height(),
        columns: df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect(),
        column_info,
        preview,
    })
}

fn preview_cells(column: &Column) -> Result<Vec<serde_json::Value>> {
    if is_numeric_dtype(column.dtype()) {
        Ok(numeric_values(column)?
            .into_iter()
            .map(|v| {
                v.and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            })
            .collect())
    } else {
        Ok(string_values(column)?
            .into_iter()
            .map(|v| v.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTypeEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
}

/// Structured context handed to the explanation service. Text generation is
/// not done here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationContext {
    pub file_name: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub column_types: Vec<ColumnTypeEntry>,
}

impl DatasetProfile {
    /// Column names capped at 8, types at 5, to keep the prompt short.
    pub fn narration_context(&self, file_name: &str) -> NarrationContext {
        NarrationContext {
            file_name: file_name.to_string(),
            rows: self.rows,
            columns: self.columns.iter().take(8).cloned().collect(),
            column_types: self
                .column_info
                .iter()
                .take(5)
                .map(|info| ColumnTypeEntry {
                    name: info.name.clone(),
                    semantic_type: info.semantic_type,
                })
                .collect(),
        }
    }

    pub fn summary(&self, name: &str) -> Option<&ColumnSummary> {
        self.column_info.iter().find(|info| info.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colors(n: usize, palette: &[&str]) -> Vec<String> {
        (0..n).map(|i| palette[i % palette.len()].to_string()).collect()
    }

    #[test]
    fn test_infer_numeric() {
        let df = df!("x" => &[1.5, 2.5, 3.5]).unwrap();
        assert_eq!(infer(df.column("x").unwrap()).unwrap(), SemanticType::Numeric);
    }

    #[test]
    fn test_infer_categorical_and_text() {
        let df = df!(
            "color" => colors(20, &["red", "green", "blue"]),
            "id" => (0..20).map(|i| format!("id-{}", i)).collect::<Vec<_>>(),
        )
        .unwrap();
        assert_eq!(infer(df.column("color").unwrap()).unwrap(), SemanticType::Categorical);
        assert_eq!(infer(df.column("id").unwrap()).unwrap(), SemanticType::Text);
    }

    #[test]
    fn test_infer_many_levels_is_text() {
        // 12 levels over 100 rows: under half the rows but not under 10
        let palette: Vec<String> = (0..12).map(|i| format!("c{}", i)).collect();
        let refs: Vec<&str> = palette.iter().map(String::as_str).collect();
        let df = df!("c" => colors(100, &refs)).unwrap();
        assert_eq!(infer(df.column("c").unwrap()).unwrap(), SemanticType::Text);
    }

    #[test]
    fn test_detect_problem_type() {
        let labels: Vec<i64> = (0..100).map(|i| i % 3).collect();
        let continuous: Vec<f64> = (0..100).map(|i| i as f64 * 0.37).collect();
        let df = df!(
            "label" => labels,
            "price" => continuous,
            "name" => colors(100, &["a", "b"]),
        )
        .unwrap();
        assert_eq!(
            detect_problem_type(df.column("label").unwrap()).unwrap(),
            ProblemType::Classification
        );
        assert_eq!(
            detect_problem_type(df.column("price").unwrap()).unwrap(),
            ProblemType::Regression
        );
        assert_eq!(
            detect_problem_type(df.column("name").unwrap()).unwrap(),
            ProblemType::Classification
        );
    }

    #[test]
    fn test_low_ratio_numeric_is_classification() {
        // 25 distinct values over 1000 rows: 2.5% ratio
        let values: Vec<i64> = (0..1000).map(|i| i % 25).collect();
        let df = df!("y" => values).unwrap();
        assert_eq!(
            detect_problem_type(df.column("y").unwrap()).unwrap(),
            ProblemType::Classification
        );
    }

    #[test]
    fn test_summarize_numeric() {
        let df = df!("x" => &[Some(1.0), Some(3.0), None, Some(5.0)]).unwrap();
        let summary = summarize_column(df.column("x").unwrap()).unwrap();
        assert_eq!(summary.missing_count, 1);
        assert!((summary.missing_percentage - 25.0).abs() < 1e-9);
        assert_eq!(summary.min, Some(1.0));
        assert_eq!(summary.max, Some(5.0));
        assert_eq!(summary.mean, Some(3.0));
        assert!(summary.top_values.is_none());
    }

    #[test]
    fn test_summarize_categorical_top_values() {
        let values = vec!["a", "a", "a", "b", "b", "c", "d", "e", "f", "a", "b", "a", "a", "a", "a", "a"];
        let df = df!("c" => values).unwrap();
        let summary = summarize_column(df.column("c").unwrap()).unwrap();
        assert_eq!(summary.semantic_type, SemanticType::Categorical);
        assert_eq!(summary.unique_values, Some(6));
        let top = summary.top_values.unwrap();
        assert_eq!(top.len(), 5);
        assert_eq!(top[0], ValueCount { value: "a".into(), count: 9 });
        assert_eq!(top[1], ValueCount { value: "b".into(), count: 3 });
    }

    #[test]
    fn test_profile_and_narration_context() {
        let n = 15;
        let df = df!(
            "a" => (0..n).map(|i| i as f64).collect::<Vec<_>>(),
            "b" => colors(n, &["x", "y"]),
        )
        .unwrap();
        let profile = profile(&df).unwrap();
        assert_eq!(profile.rows, 15);
        assert_eq!(profile.preview.len(), 10);
        assert_eq!(profile.preview[0].len(), 2);
        assert_eq!(profile.preview[1][1], serde_json::json!("y"));

        let ctx = profile.narration_context("data.csv");
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["fileName"], "data.csv");
        assert_eq!(json["columnTypes"][0]["type"], "numeric");
    }
}
