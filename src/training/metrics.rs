//! Evaluation metrics for a fitted model over its train/test split

use super::engine::TrainedModel;
use super::split::SplitResult;
use crate::dataset::ProblemType;
use crate::error::{Result, WorkbenchError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Guards the normalized-MAE alias against a constant test target
const STD_EPSILON: f64 = 1e-10;

/// How per-class precision/recall/F1 are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Averaging {
    /// Scores of the positive (larger) label only
    Binary,
    /// Per-class scores weighted by true support
    Weighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub train_accuracy: f64,
    pub averaging: Averaging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2_score: f64,
    pub train_r2: f64,
}

/// Regression scores recast onto the classification field names so every
/// result renders the same way. These are presentation values derived from
/// R² and MAE, not classification statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionAliases {
    /// max(0, R²)
    pub accuracy: f64,
    /// R²
    pub precision: f64,
    /// 1 - MAE / (std of test truth + ε)
    pub recall: f64,
    /// R²
    pub f1_score: f64,
    /// max(0, train R²)
    pub train_accuracy: f64,
}

/// Test-set headline scores in wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainScores {
    pub accuracy: f64,
}

/// Scores by problem type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "problem_type", rename_all = "lowercase")]
pub enum Scores {
    Classification(ClassificationMetrics),
    Regression {
        metrics: RegressionMetrics,
        aliases: RegressionAliases,
    },
}

/// Everything computed for one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub scores: Scores,
    /// Rows are true labels, columns predicted labels, both in `confusion_labels`
    /// order. A 2×2 zero matrix for regression.
    pub confusion_matrix: Vec<Vec<u64>>,
    pub confusion_labels: Vec<f64>,
    /// Per feature name; absent when the model has no importance notion
    pub feature_importance: Option<BTreeMap<String, f64>>,
    pub n_train_samples: usize,
    pub n_test_samples: usize,
    pub n_features: usize,
}

impl MetricsResult {
    pub fn problem_type(&self) -> ProblemType {
        match self.scores {
            Scores::Classification(_) => ProblemType::Classification,
            Scores::Regression { .. } => ProblemType::Regression,
        }
    }

    pub fn test_metrics(&self) -> ScoreSet {
        match &self.scores {
            Scores::Classification(m) => ScoreSet {
                accuracy: m.accuracy,
                precision: m.precision,
                recall: m.recall,
                f1_score: m.f1_score,
            },
            Scores::Regression { aliases, .. } => ScoreSet {
                accuracy: aliases.accuracy,
                precision: aliases.precision,
                recall: aliases.recall,
                f1_score: aliases.f1_score,
            },
        }
    }

    pub fn train_metrics(&self) -> TrainScores {
        let accuracy = match &self.scores {
            Scores::Classification(m) => m.train_accuracy,
            Scores::Regression { aliases, .. } => aliases.train_accuracy,
        };
        TrainScores { accuracy }
    }

    pub fn regression_metrics(&self) -> Option<&RegressionMetrics> {
        match &self.scores {
            Scores::Regression { metrics, .. } => Some(metrics),
            Scores::Classification(_) => None,
        }
    }

    pub fn classification_metrics(&self) -> Option<&ClassificationMetrics> {
        match &self.scores {
            Scores::Classification(m) => Some(m),
            Scores::Regression { .. } => None,
        }
    }
}

/// Score `model` on its split. Pure: the same inputs always give the same result.
pub fn compute(
    model: &TrainedModel,
    split: &SplitResult,
    train_predictions: &Array1<f64>,
    test_predictions: &Array1<f64>,
    feature_names: &[String],
) -> Result<MetricsResult> {
    check_len("train predictions", split.y_train.len(), train_predictions.len())?;
    check_len("test predictions", split.y_test.len(), test_predictions.len())?;

    let y_train = split.y_train.values.to_vec();
    let y_test = split.y_test.values.to_vec();
    let train_pred = train_predictions.to_vec();
    let test_pred = test_predictions.to_vec();

    let (scores, confusion_matrix, confusion_labels) = match model.problem_type() {
        ProblemType::Classification => {
            let (matrix, labels) = confusion_matrix(&y_test, &test_pred);
            let metrics = classification_scores(&y_test, &test_pred, &y_train, &train_pred);
            (Scores::Classification(metrics), matrix, labels)
        }
        ProblemType::Regression => {
            let metrics = regression_scores(&y_test, &test_pred, &y_train, &train_pred);
            let aliases = RegressionAliases {
                accuracy: metrics.r2_score.max(0.0),
                precision: metrics.r2_score,
                recall: 1.0 - metrics.mae / (population_std(&y_test) + STD_EPSILON),
                f1_score: metrics.r2_score,
                train_accuracy: metrics.train_r2.max(0.0),
            };
            (
                Scores::Regression { metrics, aliases },
                vec![vec![0, 0], vec![0, 0]],
                Vec::new(),
            )
        }
    };

    let feature_importance = model.feature_importance().and_then(|values| {
        if values.len() != feature_names.len() {
            return None;
        }
        Some(
            feature_names
                .iter()
                .cloned()
                .zip(values.iter().copied())
                .collect::<BTreeMap<_, _>>(),
        )
    });

    Ok(MetricsResult {
        scores,
        confusion_matrix,
        confusion_labels,
        feature_importance,
        n_train_samples: split.n_train(),
        n_test_samples: split.n_test(),
        n_features: feature_names.len(),
    })
}

fn check_len(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(WorkbenchError::ShapeError {
            expected: format!("{} {}", expected, what),
            actual: format!("{} {}", actual, what),
        });
    }
    Ok(())
}

/// Distinct values in order of first appearance across the given slices
fn labels_in_order(slices: &[&[f64]]) -> Vec<f64> {
    let mut seen = HashMap::new();
    let mut labels = Vec::new();
    for value in slices.iter().flat_map(|s| s.iter()) {
        seen.entry(value.to_bits()).or_insert_with(|| {
            labels.push(*value);
        });
    }
    labels
}

/// Confusion matrix over the union of true and predicted labels, true scanned first
pub fn confusion_matrix(y_true: &[f64], y_pred: &[f64]) -> (Vec<Vec<u64>>, Vec<f64>) {
    let labels = labels_in_order(&[y_true, y_pred]);
    let index: HashMap<u64, usize> = labels.iter().enumerate().map(|(i, l)| (l.to_bits(), i)).collect();

    let mut matrix = vec![vec![0u64; labels.len()]; labels.len()];
    for (t, p) in y_true.iter().zip(y_pred) {
        if let (Some(&row), Some(&col)) = (index.get(&t.to_bits()), index.get(&p.to_bits())) {
            matrix[row][col] += 1;
        }
    }
    (matrix, labels)
}

pub fn accuracy(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

/// Precision, recall and F1 for one label; zero wherever a denominator is zero
fn label_scores(y_true: &[f64], y_pred: &[f64], label: f64) -> (f64, f64, f64) {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == label, p == label) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    (ratio(tp, tp + fp), ratio(tp, tp + fn_), ratio(2 * tp, 2 * tp + fp + fn_))
}

fn classification_scores(y_test: &[f64], test_pred: &[f64], y_train: &[f64], train_pred: &[f64]) -> ClassificationMetrics {
    let true_labels = labels_in_order(&[y_test]);

    let (averaging, precision, recall, f1_score) = if true_labels.len() == 2 {
        let positive = true_labels[0].max(true_labels[1]);
        let (p, r, f) = label_scores(y_test, test_pred, positive);
        (Averaging::Binary, p, r, f)
    } else {
        let n = y_test.len().max(1) as f64;
        let (mut p, mut r, mut f) = (0.0, 0.0, 0.0);
        for &label in &true_labels {
            let support = y_test.iter().filter(|&&t| t == label).count() as f64;
            let (lp, lr, lf) = label_scores(y_test, test_pred, label);
            p += lp * support / n;
            r += lr * support / n;
            f += lf * support / n;
        }
        (Averaging::Weighted, p, r, f)
    };

    ClassificationMetrics {
        accuracy: accuracy(y_test, test_pred),
        precision,
        recall,
        f1_score,
        train_accuracy: accuracy(y_train, train_pred),
        averaging,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    mean(&values.iter().map(|v| (v - m).powi(2)).collect::<Vec<_>>()).sqrt()
}

/// R²; a constant truth scores 1 for a perfect fit and 0 otherwise
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let m = mean(y_true);
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - m).powi(2)).sum();
    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

fn regression_scores(y_test: &[f64], test_pred: &[f64], y_train: &[f64], train_pred: &[f64]) -> RegressionMetrics {
    let n = y_test.len().max(1) as f64;
    let mse = y_test.iter().zip(test_pred).map(|(t, p)| (t - p).powi(2)).sum::<f64>() / n;
    let mae = y_test.iter().zip(test_pred).map(|(t, p)| (t - p).abs()).sum::<f64>() / n;
    RegressionMetrics {
        mse,
        rmse: mse.sqrt(),
        mae,
        r2_score: r2_score(y_test, test_pred),
        train_r2: r2_score(y_train, train_pred),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::{TargetKind, TargetVector};
    use crate::training::config::{ModelKind, ModelSpec};
    use crate::training::engine::train;
    use crate::training::split::split;
    use ndarray::{array, Array2};

    #[test]
    fn test_confusion_matrix_first_appearance() {
        let y_true = [2.0, 0.0, 2.0, 1.0];
        let y_pred = [2.0, 0.0, 0.0, 5.0];
        let (matrix, labels) = confusion_matrix(&y_true, &y_pred);
        assert_eq!(labels, vec![2.0, 0.0, 1.0, 5.0]);
        assert_eq!(matrix[0], vec![1, 1, 0, 0]);
        assert_eq!(matrix[1], vec![0, 1, 0, 0]);
        assert_eq!(matrix[2], vec![0, 0, 0, 1]);
        assert_eq!(matrix[3], vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_binary_scores() {
        let y_true = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0];
        let y_pred = [1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0];
        let m = classification_scores(&y_true, &y_pred, &y_true, &y_true);
        assert_eq!(m.averaging, Averaging::Binary);
        assert!((m.accuracy - 0.75).abs() < 1e-12);
        assert!((m.precision - 0.75).abs() < 1e-12);
        assert!((m.recall - 0.75).abs() < 1e-12);
        assert!((m.f1_score - 0.75).abs() < 1e-12);
        assert_eq!(m.train_accuracy, 1.0);
    }

    #[test]
    fn test_binary_positive_is_larger_label() {
        // labels 3 and 7: 7 is positive, never predicted
        let y_true = [3.0, 7.0, 3.0, 7.0];
        let y_pred = [3.0, 3.0, 3.0, 3.0];
        let m = classification_scores(&y_true, &y_pred, &y_true, &y_pred);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1_score, 0.0);
        assert_eq!(m.accuracy, 0.5);
    }

    #[test]
    fn test_weighted_scores() {
        let y_true = [0.0, 0.0, 1.0, 2.0];
        let y_pred = [0.0, 1.0, 1.0, 2.0];
        let m = classification_scores(&y_true, &y_pred, &y_true, &y_pred);
        assert_eq!(m.averaging, Averaging::Weighted);
        // class 0: p=1 r=.5 ; class 1: p=.5 r=1 ; class 2: p=1 r=1
        assert!((m.precision - (0.5 * 1.0 + 0.25 * 0.5 + 0.25 * 1.0)).abs() < 1e-12);
        assert!((m.recall - (0.5 * 0.5 + 0.25 * 1.0 + 0.25 * 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_r2_constant_truth() {
        assert_eq!(r2_score(&[3.0, 3.0], &[3.0, 3.0]), 1.0);
        assert_eq!(r2_score(&[3.0, 3.0], &[2.0, 3.0]), 0.0);
        assert!((r2_score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_regression_metrics_and_aliases() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64);
        let y = TargetVector::new(x.column(0).mapv(|v| 2.0 * v + 1.0), TargetKind::Float);
        let split = split(&x, &y, 0.75).unwrap();
        let model = train(&split.x_train, &split.y_train, &ModelSpec::default_for(ModelKind::Linear), 42).unwrap();

        let train_pred = model.predict(&split.x_train).unwrap();
        let test_pred = model.predict(&split.x_test).unwrap();
        let names = vec!["x".to_string()];
        let result = compute(&model, &split, &train_pred, &test_pred, &names).unwrap();

        assert_eq!(result.problem_type(), ProblemType::Regression);
        assert_eq!(result.confusion_matrix, vec![vec![0, 0], vec![0, 0]]);
        let metrics = result.regression_metrics().unwrap();
        assert!(metrics.mse < 1e-12);
        assert!((metrics.rmse - metrics.mse.sqrt()).abs() < 1e-15);
        assert!((metrics.r2_score - 1.0).abs() < 1e-9);

        let test = result.test_metrics();
        assert!(test.accuracy >= 0.0);
        assert_eq!(test.precision, metrics.r2_score);
        assert!(result.train_metrics().accuracy >= 0.0);
        assert!(result.feature_importance.unwrap().contains_key("x"));
    }

    #[test]
    fn test_negative_r2_clamps_accuracy_alias() {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let y = TargetVector::new((0..20).map(|i| (i % 7) as f64 * 1.5).collect(), TargetKind::Float);
        let split = split(&x, &y, 0.5).unwrap();
        let model = train(&split.x_train, &split.y_train, &ModelSpec::default_for(ModelKind::Linear), 42).unwrap();
        // Deliberately bad predictions
        let train_pred = Array1::from_elem(split.n_train(), 1000.0);
        let test_pred = Array1::from_elem(split.n_test(), 1000.0);
        let result = compute(&model, &split, &train_pred, &test_pred, &["x".to_string()]).unwrap();
        let metrics = result.regression_metrics().unwrap();
        assert!(metrics.r2_score < 0.0);
        assert_eq!(result.test_metrics().accuracy, 0.0);
        assert_eq!(result.train_metrics().accuracy, 0.0);
    }

    #[test]
    fn test_classification_rows_sum_to_support() {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| (i + j) as f64);
        let y = TargetVector::new((0..30).map(|i| (i % 3) as f64).collect(), TargetKind::Integer);
        let split = split(&x, &y, 0.7).unwrap();
        let model = train(&split.x_train, &split.y_train, &ModelSpec::default_for(ModelKind::DecisionTree), 42).unwrap();
        let train_pred = model.predict(&split.x_train).unwrap();
        let test_pred = model.predict(&split.x_test).unwrap();
        let names = vec!["a".to_string(), "b".to_string()];
        let result = compute(&model, &split, &train_pred, &test_pred, &names).unwrap();

        for (row, label) in result.confusion_matrix.iter().zip(&result.confusion_labels) {
            let support = split.y_test.values.iter().filter(|v| *v == label).count() as u64;
            assert_eq!(row.iter().sum::<u64>(), support);
        }
        assert_eq!(result.n_train_samples + result.n_test_samples, 30);

        let again = compute(&model, &split, &train_pred, &test_pred, &names).unwrap();
        assert_eq!(result, again);
    }

    #[test]
    fn test_length_mismatch() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y = TargetVector::new((0..10).map(|i| (i % 2) as f64).collect(), TargetKind::Integer);
        let split = split(&x, &y, 0.7).unwrap();
        let model = train(&split.x_train, &split.y_train, &ModelSpec::default_for(ModelKind::Knn), 42).unwrap();
        let err = compute(&model, &split, &array![0.0], &array![0.0], &["x".to_string()]).unwrap_err();
        assert!(matches!(err, WorkbenchError::ShapeError { .. }));
    }
}
