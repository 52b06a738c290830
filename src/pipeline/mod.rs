//! End-to-end workbench pipeline
//!
//! A [`Pipeline`] owns one uploaded dataset and, once trained, the fitted
//! preprocessing state and model needed to score new rows. [`SessionStore`]
//! keys pipelines by opaque session id.

mod session;

pub use session::{SessionId, SessionInfo, SessionStore};

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use ndarray::Array1;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::WorkbenchConfig;
use crate::dataset::{self, DatasetProfile, NarrationContext, ProblemType};
use crate::error::{Result, WorkbenchError};
use crate::preprocessing::{DataPreprocessor, FittedTransformState, PreprocessingConfig};
use crate::training::{
    self, MetricsResult, ModelKind, ModelSpec, RegressionMetrics, ScoreSet, SplitResult, Splitter,
    TrainScores, TrainedModel,
};

fn default_split_ratio() -> u32 {
    70
}

/// What the user picked in the training form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub input_features: Vec<String>,
    pub target_variable: String,
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    /// Percentage of rows used for training
    #[serde(default = "default_split_ratio")]
    pub split_ratio: u32,
    pub model_type: String,
    #[serde(default)]
    pub hyperparameters: HashMap<String, serde_json::Value>,
}

impl TrainingRequest {
    pub fn new(
        input_features: Vec<String>,
        target_variable: impl Into<String>,
        model_type: impl Into<String>,
    ) -> Self {
        Self {
            input_features,
            target_variable: target_variable.into(),
            preprocessing: PreprocessingConfig::default(),
            split_ratio: default_split_ratio(),
            model_type: model_type.into(),
            hyperparameters: HashMap::new(),
        }
    }

    pub fn with_preprocessing(mut self, preprocessing: PreprocessingConfig) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    pub fn with_split_ratio(mut self, split_ratio: u32) -> Self {
        self.split_ratio = split_ratio;
        self
    }

    pub fn with_hyperparameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.hyperparameters.insert(name.into(), value);
        self
    }

    /// Train fraction in (0, 1)
    pub fn train_fraction(&self) -> Result<f64> {
        let fraction = self.split_ratio as f64 / 100.0;
        if self.split_ratio == 0 || self.split_ratio >= 100 {
            return Err(WorkbenchError::InvalidFraction(fraction));
        }
        Ok(fraction)
    }
}

/// A predicted or actual target value, decoded to its label when the target
/// column was text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictedValue {
    Number(f64),
    Label(String),
}

impl PredictedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PredictedValue::Number(v) => Some(*v),
            PredictedValue::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            PredictedValue::Label(s) => Some(s),
            PredictedValue::Number(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPairs {
    pub actual: Vec<PredictedValue>,
    pub predicted: Vec<PredictedValue>,
}

/// Everything the results screen shows after a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    pub test_metrics: ScoreSet,
    pub train_metrics: TrainScores,
    pub confusion_matrix: Vec<Vec<u64>>,
    /// Row/column labels of the confusion matrix
    pub confusion_labels: Vec<PredictedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regression_metrics: Option<RegressionMetrics>,
    /// Test-set targets next to their predictions
    pub predictions: PredictionPairs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_importance: Option<BTreeMap<String, f64>>,
    pub n_train_samples: usize,
    pub n_test_samples: usize,
    pub n_features: usize,
    pub feature_names: Vec<String>,
    pub target_name: String,
    pub problem_type: ProblemType,
    pub model_type: ModelKind,
    pub training_time_secs: f64,
}

/// State kept after a successful run
#[derive(Debug, Clone)]
struct TrainedState {
    transform: FittedTransformState,
    model: TrainedModel,
    split: SplitResult,
    train_predictions: Array1<f64>,
    test_predictions: Array1<f64>,
    result: TrainingResult,
}

/// One dataset plus the most recent trained model on it
#[derive(Debug, Clone)]
pub struct Pipeline {
    data: DataFrame,
    file_name: String,
    profile: DatasetProfile,
    random_seed: u64,
    trained: Option<TrainedState>,
}

impl Pipeline {
    /// Validate and profile `data`. Rejected datasets never become pipelines.
    pub fn new(data: DataFrame, file_name: impl Into<String>, config: &WorkbenchConfig) -> Result<Self> {
        dataset::validate(&data, &config.validation)?;
        let profile = dataset::profile(&data)?;
        let file_name = file_name.into();

        info!(
            file = %file_name,
            rows = profile.rows,
            columns = profile.columns.len(),
            "Dataset loaded"
        );

        Ok(Self {
            data,
            file_name,
            profile,
            random_seed: config.random_seed,
            trained: None,
        })
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn profile(&self) -> &DatasetProfile {
        &self.profile
    }

    pub fn narration_context(&self) -> NarrationContext {
        self.profile.narration_context(&self.file_name)
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    pub fn last_result(&self) -> Option<&TrainingResult> {
        self.trained.as_ref().map(|t| &t.result)
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.trained.as_ref().map(|t| &t.model)
    }

    pub fn transform_state(&self) -> Option<&FittedTransformState> {
        self.trained.as_ref().map(|t| &t.transform)
    }

    /// Preprocess, split, fit and score. A successful run replaces the
    /// previous model; a failed one leaves it in place.
    pub fn train(&mut self, request: &TrainingRequest) -> Result<TrainingResult> {
        let start = Instant::now();

        dataset::validate_selection(&self.data, &request.input_features, &request.target_variable)?;
        let spec = ModelSpec::from_request(&request.model_type, &request.hyperparameters)?;
        let fraction = request.train_fraction()?;

        let preprocessor = DataPreprocessor::new(request.preprocessing.clone());
        let (x, y, transform) =
            preprocessor.fit_transform(&self.data, &request.input_features, &request.target_variable)?;
        debug!(rows = x.nrows(), features = x.ncols(), "Preprocessed training data");

        let split = Splitter::new(self.random_seed).split(&x, &y, fraction)?;
        let model = training::train(&split.x_train, &split.y_train, &spec, self.random_seed)?;

        let train_predictions = model.predict(&split.x_train)?;
        let test_predictions = model.predict(&split.x_test)?;
        let metrics = training::compute(
            &model,
            &split,
            &train_predictions,
            &test_predictions,
            &transform.feature_columns,
        )?;

        let result = build_result(
            &metrics,
            &split,
            &test_predictions,
            &transform,
            spec.kind(),
            start.elapsed().as_secs_f64(),
        );

        info!(
            model = %result.model_type,
            problem = ?result.problem_type,
            accuracy = result.test_metrics.accuracy,
            elapsed_secs = result.training_time_secs,
            "Training run complete"
        );

        self.trained = Some(TrainedState {
            transform,
            model,
            split,
            train_predictions,
            test_predictions,
            result: result.clone(),
        });
        Ok(result)
    }

    /// Score new rows shaped like the training features. Labels come back
    /// decoded when the target was text.
    pub fn predict(&self, rows: &DataFrame) -> Result<Vec<PredictedValue>> {
        let trained = self.trained.as_ref().ok_or(WorkbenchError::NoTrainedModel)?;
        let x = trained.transform.transform(rows)?;
        let predictions = trained.model.predict(&x)?;
        debug!(rows = predictions.len(), "Predicted");
        Ok(decode_all(&trained.transform, predictions.iter().copied()))
    }

    /// Recompute metrics from the stored split and predictions
    pub fn recompute_metrics(&self) -> Result<MetricsResult> {
        let trained = self.trained.as_ref().ok_or(WorkbenchError::NoTrainedModel)?;
        training::compute(
            &trained.model,
            &trained.split,
            &trained.train_predictions,
            &trained.test_predictions,
            &trained.transform.feature_columns,
        )
    }
}

fn decode_value(transform: &FittedTransformState, value: f64) -> PredictedValue {
    match transform.decode_target(value) {
        Some(label) => PredictedValue::Label(label),
        None => PredictedValue::Number(value),
    }
}

fn decode_all(
    transform: &FittedTransformState,
    values: impl IntoIterator<Item = f64>,
) -> Vec<PredictedValue> {
    values.into_iter().map(|v| decode_value(transform, v)).collect()
}

fn build_result(
    metrics: &MetricsResult,
    split: &SplitResult,
    test_predictions: &Array1<f64>,
    transform: &FittedTransformState,
    model_type: ModelKind,
    training_time_secs: f64,
) -> TrainingResult {
    TrainingResult {
        test_metrics: metrics.test_metrics(),
        train_metrics: metrics.train_metrics(),
        confusion_matrix: metrics.confusion_matrix.clone(),
        confusion_labels: decode_all(transform, metrics.confusion_labels.iter().copied()),
        regression_metrics: metrics.regression_metrics().cloned(),
        predictions: PredictionPairs {
            actual: decode_all(transform, split.y_test.values.iter().copied()),
            predicted: decode_all(transform, test_predictions.iter().copied()),
        },
        feature_importance: metrics.feature_importance.clone(),
        n_train_samples: metrics.n_train_samples,
        n_test_samples: metrics.n_test_samples,
        n_features: metrics.n_features,
        feature_names: transform.feature_columns.clone(),
        target_name: transform.target_column.clone(),
        problem_type: metrics.problem_type(),
        model_type,
        training_time_secs,
    }
}
