//! Preprocessing pipeline: impute, encode, scale

use super::encoder::LabelEncoding;
use super::imputer::{fill_numeric, fill_text, ImputeValue, Imputer};
use super::scaler::Scaler;
use super::PreprocessingConfig;
use crate::dataset::{is_float_dtype, is_numeric_dtype, numeric_values, string_values};
use crate::error::{Result, WorkbenchError};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// How the target values were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Integer or boolean column, used as-is
    Integer,
    /// Floating-point column, used as-is
    Float,
    /// Non-numeric labels replaced by their codes
    Encoded,
}

/// Target column after preprocessing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetVector {
    pub values: Array1<f64>,
    pub kind: TargetKind,
}

impl TargetVector {
    pub fn new(values: Array1<f64>, kind: TargetKind) -> Self {
        Self { values, kind }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether values are discrete labels rather than measurements
    pub fn is_discrete(&self) -> bool {
        self.kind != TargetKind::Float
    }

    pub fn n_distinct(&self) -> usize {
        self.values
            .iter()
            .map(|v| v.to_bits())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Subset by row indices, preserving the kind.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            values: indices.iter().map(|&i| self.values[i]).collect(),
            kind: self.kind,
        }
    }
}

/// Everything learned during `fit_transform`, applied again at prediction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTransformState {
    pub feature_columns: Vec<String>,
    pub target_column: String,
    pub handle_missing: bool,
    /// Fill value per feature column
    pub imputation: BTreeMap<String, ImputeValue>,
    /// Category codes per encoded feature column
    pub encodings: BTreeMap<String, LabelEncoding>,
    pub target_encoding: Option<LabelEncoding>,
    pub target_kind: TargetKind,
    pub scaler: Scaler,
}

/// A feature column mid-pipeline
enum RawColumn {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl RawColumn {
    fn is_all_missing(&self) -> bool {
        match self {
            RawColumn::Numeric(values) => values.iter().all(Option::is_none),
            RawColumn::Text(values) => values.iter().all(Option::is_none),
        }
    }
}

/// Turns a dataset selection into a numeric feature matrix and target vector
#[derive(Debug, Clone, Default)]
pub struct DataPreprocessor {
    config: PreprocessingConfig,
}

impl DataPreprocessor {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    /// Fit every transformer on `df` and return the transformed data along
    /// with the fitted state.
    ///
    /// Order is fixed: imputation, then encoding, then scaling. Rows whose
    /// target is missing are dropped first.
    pub fn fit_transform<S: AsRef<str>>(
        &self,
        df: &DataFrame,
        features: &[S],
        target: &str,
    ) -> Result<(Array2<f64>, TargetVector, FittedTransformState)> {
        let features: Vec<String> = features.iter().map(|f| f.as_ref().to_string()).collect();
        check_request_shape(df, &features, target)?;

        let target_column = df.column(target)?;
        let (target_values, target_encoding, target_kind, keep) = prepare_target(target_column)?;
        if keep.len() < df.height() {
            warn!(
                column = %target,
                dropped = df.height() - keep.len(),
                "Dropping rows with missing target"
            );
        }

        let mut imputation = BTreeMap::new();
        let mut encodings = BTreeMap::new();
        let imputer = Imputer::new(self.config.missing_strategy);
        let mut matrix = Array2::<f64>::zeros((keep.len(), features.len()));

        for (j, name) in features.iter().enumerate() {
            let column = df.column(name)?;
            let mut raw = read_column(column, &keep)?;
            if !keep.is_empty() && raw.is_all_missing() {
                return Err(WorkbenchError::Preprocessing(format!(
                    "input contains NaN/null values in column '{}': it has no values in the {} row(s) that have a target",
                    name,
                    keep.len()
                )));
            }

            // 1. imputation
            if self.config.handle_missing {
                let fill = match &raw {
                    RawColumn::Numeric(values) => imputer.fit_numeric(values),
                    RawColumn::Text(values) => imputer.fit_text(values),
                };
                if let Some(fill) = fill {
                    apply_fill(&mut raw, &fill);
                    imputation.insert(name.clone(), fill);
                }
            }

            // 2. encoding
            let values = match raw {
                RawColumn::Numeric(values) => require_observed(name, values)?,
                RawColumn::Text(values) => {
                    if !self.config.encode_categories {
                        return Err(WorkbenchError::Preprocessing(format!(
                            "could not convert string to float: column '{}' is not numeric and category encoding is disabled",
                            name
                        )));
                    }
                    if values.iter().any(Option::is_none) {
                        return Err(missing_error(name));
                    }
                    let encoding = LabelEncoding::fit(&values);
                    let codes = encoding.encode(name, &values)?;
                    debug!(column = %name, categories = encoding.len(), "Encoded column");
                    encodings.insert(name.clone(), encoding);
                    codes
                }
            };

            for (i, v) in values.into_iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }

        // 3. scaling
        let (scaler, matrix) = Scaler::fit_transform(self.config.scaler_type(), &matrix)?;

        info!(
            rows = matrix.nrows(),
            features = matrix.ncols(),
            imputed = imputation.len(),
            encoded = encodings.len(),
            scaler = ?scaler.scaler_type(),
            "Preprocessing complete"
        );

        let state = FittedTransformState {
            feature_columns: features,
            target_column: target.to_string(),
            handle_missing: self.config.handle_missing,
            imputation,
            encodings,
            target_encoding,
            target_kind,
            scaler,
        };

        Ok((matrix, TargetVector::new(target_values, target_kind), state))
    }
}

impl FittedTransformState {
    /// Apply the fitted imputation, encoding and scaling to new rows.
    pub fn transform(&self, df: &DataFrame) -> Result<Array2<f64>> {
        let height = df.height();
        let mut matrix = Array2::<f64>::zeros((height, self.feature_columns.len()));

        for (j, name) in self.feature_columns.iter().enumerate() {
            let column = df
                .column(name)
                .map_err(|_| WorkbenchError::UnknownColumn(name.clone()))?;

            let values = match self.encodings.get(name) {
                Some(encoding) => {
                    let mut values = string_values(column)?;
                    if let Some(ImputeValue::Text(fill)) = self.imputation.get(name) {
                        fill_text(&mut values, fill);
                    }
                    if values.iter().any(Option::is_none) {
                        return Err(missing_error(name));
                    }
                    encoding.encode(name, &values)?
                }
                None => {
                    let mut values = numeric_values(column)?;
                    if let Some(ImputeValue::Numeric(fill)) = self.imputation.get(name) {
                        fill_numeric(&mut values, *fill);
                    }
                    require_observed(name, values)?
                }
            };

            for (i, v) in values.into_iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }

        self.scaler.transform(&matrix)
    }

    /// Map a model output back to the user's label when the target was encoded.
    pub fn decode_target(&self, value: f64) -> Option<String> {
        let encoding = self.target_encoding.as_ref()?;
        if value < 0.0 || value.fract() != 0.0 {
            return None;
        }
        encoding.decode(value as usize).map(str::to_string)
    }
}

fn check_request_shape(df: &DataFrame, features: &[String], target: &str) -> Result<()> {
    let has = |name: &str| df.get_column_names().iter().any(|c| c.as_str() == name);

    if let Some(unknown) = features.iter().find(|f| !has(f)) {
        return Err(WorkbenchError::UnknownColumn(unknown.clone()));
    }
    if !has(target) {
        return Err(WorkbenchError::UnknownColumn(target.to_string()));
    }
    if features.iter().any(|f| f == target) {
        return Err(WorkbenchError::TargetLeakage(target.to_string()));
    }
    if features.is_empty() {
        return Err(WorkbenchError::NoFeatures);
    }
    Ok(())
}

/// Returns (values, encoding, kind, indices of rows with an observed target).
fn prepare_target(
    column: &Column,
) -> Result<(Array1<f64>, Option<LabelEncoding>, TargetKind, Vec<usize>)> {
    if is_numeric_dtype(column.dtype()) {
        let kind = if is_float_dtype(column.dtype()) {
            TargetKind::Float
        } else {
            TargetKind::Integer
        };
        let raw = numeric_values(column)?;
        let keep: Vec<usize> = (0..raw.len()).filter(|&i| raw[i].is_some()).collect();
        let values = raw.into_iter().flatten().collect();
        return Ok((values, None, kind, keep));
    }

    let raw = string_values(column)?;
    let keep: Vec<usize> = (0..raw.len()).filter(|&i| raw[i].is_some()).collect();
    let observed = select_rows(raw, &keep);
    let encoding = LabelEncoding::fit(&observed);
    let codes = encoding.encode(column.name().as_str(), &observed)?;
    Ok((Array1::from(codes), Some(encoding), TargetKind::Encoded, keep))
}

fn read_column(column: &Column, rows: &[usize]) -> Result<RawColumn> {
    if is_numeric_dtype(column.dtype()) {
        Ok(RawColumn::Numeric(select_rows(numeric_values(column)?, rows)))
    } else {
        Ok(RawColumn::Text(select_rows(string_values(column)?, rows)))
    }
}

fn select_rows<T>(values: Vec<T>, rows: &[usize]) -> Vec<T> {
    if rows.len() == values.len() {
        return values;
    }
    let mut slots: Vec<Option<T>> = values.into_iter().map(Some).collect();
    rows.iter().filter_map(|&i| slots[i].take()).collect()
}

fn apply_fill(raw: &mut RawColumn, fill: &ImputeValue) {
    match (raw, fill) {
        (RawColumn::Numeric(values), ImputeValue::Numeric(v)) => fill_numeric(values, *v),
        (RawColumn::Text(values), ImputeValue::Text(v)) => fill_text(values, v),
        _ => {}
    }
}

fn require_observed(name: &str, values: Vec<Option<f64>>) -> Result<Vec<f64>> {
    values
        .into_iter()
        .map(|v| v.ok_or_else(|| missing_error(name)))
        .collect()
}

fn missing_error(name: &str) -> WorkbenchError {
    WorkbenchError::Preprocessing(format!(
        "input contains NaN/null values in column '{}'",
        name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    fn mixed_df() -> DataFrame {
        df!(
            "age" => &[Some(20.0), Some(30.0), None, Some(50.0), Some(60.0), Some(40.0)],
            "city" => &[Some("nyc"), Some("la"), Some("nyc"), None, Some("sf"), Some("nyc")],
            "label" => &["yes", "no", "yes", "no", "yes", "no"],
        )
        .unwrap()
    }

    #[test]
    fn test_request_shape_errors() {
        let df = mixed_df();
        let pre = DataPreprocessor::default();
        assert!(matches!(
            pre.fit_transform(&df, &["nope"], "label"),
            Err(WorkbenchError::UnknownColumn(c)) if c == "nope"
        ));
        assert!(matches!(
            pre.fit_transform(&df, &["age", "label"], "label"),
            Err(WorkbenchError::TargetLeakage(_))
        ));
        let none: [&str; 0] = [];
        assert!(matches!(
            pre.fit_transform(&df, &none, "label"),
            Err(WorkbenchError::NoFeatures)
        ));
    }

    #[test]
    fn test_impute_and_encode() {
        let df = mixed_df();
        let pre = DataPreprocessor::new(PreprocessingConfig::new());
        let (x, y, state) = pre.fit_transform(&df, &["age", "city"], "label").unwrap();

        assert_eq!(x.dim(), (6, 2));
        assert!(x.iter().all(|v| v.is_finite()));
        // mean of observed ages
        assert_eq!(x[[2, 0]], 40.0);
        // classes sorted: la=0, nyc=1, sf=2; missing city imputed with "nyc"
        assert_eq!(x.column(1).to_vec(), vec![1.0, 0.0, 1.0, 1.0, 2.0, 1.0]);
        assert_eq!(y.kind, TargetKind::Encoded);
        assert_eq!(y.values.to_vec(), vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        assert_eq!(state.decode_target(1.0), Some("yes".to_string()));
        assert!(state.encodings.contains_key("city"));
    }

    #[test]
    fn test_missing_without_imputation_fails() {
        let df = mixed_df();
        let pre = DataPreprocessor::new(PreprocessingConfig::new().with_handle_missing(false));
        let err = pre.fit_transform(&df, &["age"], "label").unwrap_err();
        assert!(err.to_string().contains("NaN/null"));
    }

    #[test]
    fn test_text_without_encoding_fails() {
        let df = mixed_df();
        let pre = DataPreprocessor::new(PreprocessingConfig::new().with_encode_categories(false));
        let err = pre.fit_transform(&df, &["city"], "label").unwrap_err();
        assert!(err.to_string().contains("could not convert"));
    }

    #[test]
    fn test_target_encoded_even_without_category_encoding() {
        let df = mixed_df();
        let pre = DataPreprocessor::new(PreprocessingConfig::new().with_encode_categories(false));
        let (_, y, _) = pre.fit_transform(&df, &["age"], "label").unwrap();
        assert_eq!(y.kind, TargetKind::Encoded);
    }

    #[test]
    fn test_standardization_applies_to_encoded_columns() {
        let df = mixed_df();
        let pre = DataPreprocessor::new(PreprocessingConfig::new().with_standardization(true));
        let (x, _, _) = pre.fit_transform(&df, &["age", "city"], "label").unwrap();
        for column in x.axis_iter(Axis(1)) {
            assert!(column.mean().unwrap().abs() < 1e-9);
            assert!((column.std(0.0) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rows_with_missing_target_are_dropped() {
        let df = df!(
            "x" => &[1.0, 2.0, 3.0, 4.0],
            "y" => &[Some(1i64), None, Some(0), Some(1)],
        )
        .unwrap();
        let (x, y, state) = DataPreprocessor::default().fit_transform(&df, &["x"], "y").unwrap();
        assert_eq!(x.column(0).to_vec(), vec![1.0, 3.0, 4.0]);
        assert_eq!(y.values.to_vec(), vec![1.0, 0.0, 1.0]);
        assert_eq!(state.target_kind, TargetKind::Integer);
    }

    #[test]
    fn test_feature_empty_after_target_drop_names_column() {
        let df = df!(
            "x" => &[Some(1.0), Some(2.0), Some(3.0), Some(4.0)],
            "sparse" => &[Some(5.0), None, None, Some(8.0)],
            "y" => &[None, Some(1i64), Some(0), None],
        )
        .unwrap();
        let err = DataPreprocessor::default()
            .fit_transform(&df, &["x", "sparse"], "y")
            .unwrap_err();
        match err {
            WorkbenchError::Preprocessing(msg) => {
                assert!(msg.contains("'sparse'"), "{}", msg);
                assert!(msg.contains("no values in the 2 row(s) that have a target"), "{}", msg);
                assert!(msg.contains("NaN/null"), "{}", msg);
            }
            other => panic!("expected a preprocessing error, got {:?}", other),
        }
    }

    #[test]
    fn test_state_transform_rejects_text_in_numeric_column() {
        let df = df!(
            "x" => &[1.0, 2.0, 3.0, 4.0],
            "y" => &[0i64, 0, 1, 1],
        )
        .unwrap();
        let (_, _, state) = DataPreprocessor::default().fit_transform(&df, &["x"], "y").unwrap();
        let rows = df!("x" => &["abc", "29"]).unwrap();
        assert!(matches!(
            state.transform(&rows),
            Err(WorkbenchError::Preprocessing(ref msg)) if msg.contains("'x'")
        ));
    }

    #[test]
    fn test_state_transform_matches_training_matrix() {
        let df = mixed_df();
        let pre = DataPreprocessor::new(PreprocessingConfig::new().with_normalization(true));
        let (x, _, state) = pre.fit_transform(&df, &["age", "city"], "label").unwrap();
        let again = state.transform(&df).unwrap();
        assert_eq!(x, again);
    }

    #[test]
    fn test_state_transform_rejects_unseen_category() {
        let df = mixed_df();
        let (_, _, state) = DataPreprocessor::default()
            .fit_transform(&df, &["age", "city"], "label")
            .unwrap();
        let rows = df!("age" => &[33.0], "city" => &["paris"]).unwrap();
        assert!(state.transform(&rows).is_err());
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let df = mixed_df();
        let (_, _, state) = DataPreprocessor::new(PreprocessingConfig::new().with_standardization(true))
            .fit_transform(&df, &["age", "city"], "label")
            .unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let back: FittedTransformState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
