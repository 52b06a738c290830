//! Training engine: builds the model a spec describes and fits it

use super::config::{ModelKind, ModelSpec};
use super::decision_tree::{Criterion, DecisionTree};
use super::knn::{KNNClassifier, KNNConfig, KNNRegressor};
use super::linear_models::{LinearRegression, LogisticClassifier};
use super::neural_network::{MLPClassifier, MLPConfig, MLPRegressor};
use super::random_forest::RandomForest;
use super::svm::{Kernel, SVMClassifier, SVMConfig, SVMRegressor};
use crate::dataset::ProblemType;
use crate::error::{Result, WorkbenchError};
use crate::preprocessing::TargetVector;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Discrete targets with fewer distinct values than this are classified.
pub const CLASSIFICATION_MAX_CLASSES: usize = 50;

/// How a fitted model exposes per-feature importance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceKind {
    None,
    /// Normalized impurity decrease
    Intrinsic,
    /// Absolute value of the first coefficient row
    CoefficientMagnitude,
}

/// Fitted model, one variant per family and problem type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    LogisticRegression(LogisticClassifier),
    LinearRegression(LinearRegression),
    DecisionTreeClassifier(DecisionTree),
    DecisionTreeRegressor(DecisionTree),
    RandomForestClassifier(RandomForest),
    RandomForestRegressor(RandomForest),
    SVMClassifier(SVMClassifier),
    SVMRegressor(SVMRegressor),
    KNNClassifier(KNNClassifier),
    KNNRegressor(KNNRegressor),
    MLPClassifier(MLPClassifier),
    MLPRegressor(MLPRegressor),
}

/// Classification when the target holds few distinct discrete values
pub fn problem_type_for(y: &TargetVector) -> ProblemType {
    if y.is_discrete() && y.n_distinct() < CLASSIFICATION_MAX_CLASSES {
        ProblemType::Classification
    } else {
        ProblemType::Regression
    }
}

/// Fit the model `spec` describes on `(x, y)`. Fit failures of any kind come
/// back as `Training` carrying the underlying message.
pub fn train(x: &Array2<f64>, y: &TargetVector, spec: &ModelSpec, seed: u64) -> Result<TrainedModel> {
    if x.nrows() != y.len() {
        return Err(WorkbenchError::ShapeError {
            expected: format!("{} target values", x.nrows()),
            actual: format!("{} target values", y.len()),
        });
    }

    let problem_type = problem_type_for(y);
    let start = Instant::now();
    let model = fit(x, &y.values, spec, problem_type, seed).map_err(|err| match err {
        WorkbenchError::Training(_) => err,
        other => WorkbenchError::Training(other.to_string()),
    })?;

    info!(
        model_type = %spec.kind(),
        problem_type = ?problem_type,
        n_samples = x.nrows(),
        n_features = x.ncols(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Model trained"
    );
    Ok(model)
}

fn fit(x: &Array2<f64>, y: &Array1<f64>, spec: &ModelSpec, problem_type: ProblemType, seed: u64) -> Result<TrainedModel> {
    let classify = problem_type == ProblemType::Classification;

    let model = match spec {
        ModelSpec::Linear(params) => {
            if classify {
                let mut model = LogisticClassifier::new(params.max_iterations).with_c(params.c);
                model.fit(x, y)?;
                TrainedModel::LogisticRegression(model)
            } else {
                let mut model = LinearRegression::new();
                model.fit(x, y)?;
                TrainedModel::LinearRegression(model)
            }
        }
        ModelSpec::DecisionTree(params) => {
            let base = if classify {
                DecisionTree::new_classifier()
            } else {
                DecisionTree::new_regressor()
            };
            let base = match params.criterion {
                Some(criterion) if fits_problem(criterion, classify) => base.with_criterion(criterion),
                Some(criterion) => {
                    debug!(?criterion, ?problem_type, "Criterion does not apply, using default");
                    base
                }
                None => base,
            };
            let mut tree = base
                .with_max_depth(params.max_depth)
                .with_min_samples_split(params.min_samples_split)
                .with_min_samples_leaf(params.min_samples_leaf)
                .with_random_state(seed);
            tree.fit(x, y)?;
            if classify {
                TrainedModel::DecisionTreeClassifier(tree)
            } else {
                TrainedModel::DecisionTreeRegressor(tree)
            }
        }
        ModelSpec::RandomForest(params) => {
            let base = if classify {
                RandomForest::new_classifier(params.n_estimators)
            } else {
                RandomForest::new_regressor(params.n_estimators)
            };
            let mut forest = base
                .with_max_depth(params.max_depth)
                .with_min_samples_split(params.min_samples_split)
                .with_min_samples_leaf(params.min_samples_leaf)
                .with_random_state(seed);
            forest.fit(x, y)?;
            if classify {
                TrainedModel::RandomForestClassifier(forest)
            } else {
                TrainedModel::RandomForestRegressor(forest)
            }
        }
        ModelSpec::Svm(params) => {
            let config = SVMConfig {
                c: params.c,
                kernel: params.kernel,
                gamma: params.gamma,
                degree: params.degree,
                random_state: seed,
                ..Default::default()
            };
            if classify {
                let mut model = SVMClassifier::new(config);
                model.fit(x, y)?;
                TrainedModel::SVMClassifier(model)
            } else {
                let mut model = SVMRegressor::new(config);
                model.fit(x, y)?;
                TrainedModel::SVMRegressor(model)
            }
        }
        ModelSpec::Knn(params) => {
            let config = KNNConfig {
                n_neighbors: params.n_neighbors,
                metric: params.metric,
                weights: params.weights,
            };
            if classify {
                let mut model = KNNClassifier::new(config);
                model.fit(x, y)?;
                TrainedModel::KNNClassifier(model)
            } else {
                let mut model = KNNRegressor::new(config);
                model.fit(x, y)?;
                TrainedModel::KNNRegressor(model)
            }
        }
        ModelSpec::NeuralNetwork(params) => {
            let config = MLPConfig {
                hidden_layers: params.hidden_layer_sizes.clone(),
                max_epochs: params.max_iterations,
                learning_rate: params.learning_rate,
                activation: params.activation,
                random_state: seed,
                ..Default::default()
            };
            if classify {
                let mut model = MLPClassifier::new(config);
                model.fit(x, y)?;
                TrainedModel::MLPClassifier(model)
            } else {
                let mut model = MLPRegressor::new(config);
                model.fit(x, y)?;
                TrainedModel::MLPRegressor(model)
            }
        }
    };
    Ok(model)
}

fn fits_problem(criterion: Criterion, classify: bool) -> bool {
    match criterion {
        Criterion::Gini | Criterion::Entropy => classify,
        Criterion::Mse => !classify,
    }
}

impl TrainedModel {
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            TrainedModel::LogisticRegression(m) => m.predict(x),
            TrainedModel::LinearRegression(m) => m.predict(x),
            TrainedModel::DecisionTreeClassifier(m) | TrainedModel::DecisionTreeRegressor(m) => m.predict(x),
            TrainedModel::RandomForestClassifier(m) | TrainedModel::RandomForestRegressor(m) => m.predict(x),
            TrainedModel::SVMClassifier(m) => m.predict(x),
            TrainedModel::SVMRegressor(m) => m.predict(x),
            TrainedModel::KNNClassifier(m) => m.predict(x),
            TrainedModel::KNNRegressor(m) => m.predict(x),
            TrainedModel::MLPClassifier(m) => m.predict(x),
            TrainedModel::MLPRegressor(m) => m.predict(x),
        }
    }

    pub fn problem_type(&self) -> ProblemType {
        match self {
            TrainedModel::LogisticRegression(_)
            | TrainedModel::DecisionTreeClassifier(_)
            | TrainedModel::RandomForestClassifier(_)
            | TrainedModel::SVMClassifier(_)
            | TrainedModel::KNNClassifier(_)
            | TrainedModel::MLPClassifier(_) => ProblemType::Classification,
            TrainedModel::LinearRegression(_)
            | TrainedModel::DecisionTreeRegressor(_)
            | TrainedModel::RandomForestRegressor(_)
            | TrainedModel::SVMRegressor(_)
            | TrainedModel::KNNRegressor(_)
            | TrainedModel::MLPRegressor(_) => ProblemType::Regression,
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::LogisticRegression(_) | TrainedModel::LinearRegression(_) => ModelKind::Linear,
            TrainedModel::DecisionTreeClassifier(_) | TrainedModel::DecisionTreeRegressor(_) => {
                ModelKind::DecisionTree
            }
            TrainedModel::RandomForestClassifier(_) | TrainedModel::RandomForestRegressor(_) => {
                ModelKind::RandomForest
            }
            TrainedModel::SVMClassifier(_) | TrainedModel::SVMRegressor(_) => ModelKind::Svm,
            TrainedModel::KNNClassifier(_) | TrainedModel::KNNRegressor(_) => ModelKind::Knn,
            TrainedModel::MLPClassifier(_) | TrainedModel::MLPRegressor(_) => ModelKind::NeuralNetwork,
        }
    }

    pub fn importance_kind(&self) -> ImportanceKind {
        match self {
            TrainedModel::DecisionTreeClassifier(_)
            | TrainedModel::DecisionTreeRegressor(_)
            | TrainedModel::RandomForestClassifier(_)
            | TrainedModel::RandomForestRegressor(_) => ImportanceKind::Intrinsic,
            TrainedModel::LogisticRegression(_) | TrainedModel::LinearRegression(_) => {
                ImportanceKind::CoefficientMagnitude
            }
            TrainedModel::SVMClassifier(m) if m.config().kernel == Kernel::Linear => {
                ImportanceKind::CoefficientMagnitude
            }
            TrainedModel::SVMRegressor(m) if m.config().kernel == Kernel::Linear => {
                ImportanceKind::CoefficientMagnitude
            }
            _ => ImportanceKind::None,
        }
    }

    /// One score per feature column, or `None` when the model has no notion of it
    pub fn feature_importance(&self) -> Option<Array1<f64>> {
        match self {
            TrainedModel::DecisionTreeClassifier(m) | TrainedModel::DecisionTreeRegressor(m) => {
                m.feature_importances().cloned()
            }
            TrainedModel::RandomForestClassifier(m) | TrainedModel::RandomForestRegressor(m) => {
                m.feature_importances().cloned()
            }
            TrainedModel::LogisticRegression(m) => m.coefficients().map(|c| c.mapv(f64::abs)),
            TrainedModel::LinearRegression(m) => m.coefficients.as_ref().map(|c| c.mapv(f64::abs)),
            TrainedModel::SVMClassifier(m) => m.coefficients().map(|c| c.mapv(f64::abs)),
            TrainedModel::SVMRegressor(m) => m.coefficients().map(|c| c.mapv(f64::abs)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::TargetKind;
    use crate::training::config::{SvmParams, TreeParams};
    use std::collections::HashMap;

    fn blobs() -> (Array2<f64>, TargetVector) {
        let x = Array2::from_shape_fn((40, 3), |(i, j)| {
            let base = if i < 20 { 0.0 } else { 4.0 };
            base + ((i * 3 + j * 7) % 5) as f64 * 0.2
        });
        let y = TargetVector::new((0..40).map(|i| if i < 20 { 0.0 } else { 1.0 }).collect(), TargetKind::Integer);
        (x, y)
    }

    fn ramp() -> (Array2<f64>, TargetVector) {
        let x = Array2::from_shape_fn((60, 2), |(i, j)| i as f64 + j as f64 * 0.5);
        let y = TargetVector::new((0..60).map(|i| 3.0 * i as f64 + 0.25).collect(), TargetKind::Float);
        (x, y)
    }

    #[test]
    fn test_problem_type_rule() {
        let discrete = TargetVector::new((0..100).map(|i| (i % 3) as f64).collect(), TargetKind::Integer);
        assert_eq!(problem_type_for(&discrete), ProblemType::Classification);

        let floats = TargetVector::new((0..100).map(|i| (i % 3) as f64).collect(), TargetKind::Float);
        assert_eq!(problem_type_for(&floats), ProblemType::Regression);

        let many = TargetVector::new((0..100).map(|i| (i % 50) as f64).collect(), TargetKind::Integer);
        assert_eq!(problem_type_for(&many), ProblemType::Regression);
    }

    #[test]
    fn test_every_family_classifies() {
        let (x, y) = blobs();
        for kind in ModelKind::ALL {
            let spec = ModelSpec::parse(kind, &HashMap::new()).unwrap();
            let model = train(&x, &y, &spec, 42).unwrap();
            assert_eq!(model.problem_type(), ProblemType::Classification);
            assert_eq!(model.kind(), kind);
            let predictions = model.predict(&x).unwrap();
            assert_eq!(predictions.len(), 40);
            assert!(predictions.iter().all(|p| *p == 0.0 || *p == 1.0), "{}", kind);
        }
    }

    #[test]
    fn test_every_family_regresses() {
        let (x, y) = ramp();
        for kind in ModelKind::ALL {
            let spec = ModelSpec::parse(kind, &HashMap::new()).unwrap();
            let model = train(&x, &y, &spec, 42).unwrap();
            assert_eq!(model.problem_type(), ProblemType::Regression);
            assert!(model.predict(&x).unwrap().iter().all(|p| p.is_finite()), "{}", kind);
        }
    }

    #[test]
    fn test_importance_capabilities() {
        let (x, y) = blobs();
        let tree = train(&x, &y, &ModelSpec::DecisionTree(TreeParams::default()), 42).unwrap();
        assert_eq!(tree.importance_kind(), ImportanceKind::Intrinsic);
        let importances = tree.feature_importance().unwrap();
        assert_eq!(importances.len(), 3);
        assert!((importances.sum() - 1.0).abs() < 1e-9);

        let linear = train(&x, &y, &ModelSpec::default_for(ModelKind::Linear), 42).unwrap();
        assert_eq!(linear.importance_kind(), ImportanceKind::CoefficientMagnitude);
        assert!(linear.feature_importance().unwrap().iter().all(|v| *v >= 0.0));

        let rbf = train(&x, &y, &ModelSpec::default_for(ModelKind::Svm), 42).unwrap();
        assert_eq!(rbf.importance_kind(), ImportanceKind::None);
        assert!(rbf.feature_importance().is_none());

        let linear_svm = ModelSpec::Svm(SvmParams {
            kernel: Kernel::Linear,
            ..Default::default()
        });
        let linear_svm = train(&x, &y, &linear_svm, 42).unwrap();
        assert_eq!(linear_svm.importance_kind(), ImportanceKind::CoefficientMagnitude);
        assert_eq!(linear_svm.feature_importance().unwrap().len(), 3);

        let knn = train(&x, &y, &ModelSpec::default_for(ModelKind::Knn), 42).unwrap();
        assert_eq!(knn.importance_kind(), ImportanceKind::None);
    }

    #[test]
    fn test_fit_failure_is_training_error() {
        let (x, y) = blobs();
        let spec = ModelSpec::Knn(crate::training::config::KnnParams {
            n_neighbors: 500,
            ..Default::default()
        });
        let err = train(&x, &y, &spec, 42).unwrap_err();
        assert!(matches!(err, WorkbenchError::Training(ref msg) if msg.contains("n_neighbors")));
    }

    #[test]
    fn test_model_options_reach_the_fit() {
        let (x, y) = blobs();
        let raw: HashMap<String, serde_json::Value> =
            serde_json::from_value(serde_json::json!({"metric": "manhattan", "n_neighbors": 3})).unwrap();
        let model = train(&x, &y, &ModelSpec::from_request("knn", &raw).unwrap(), 42).unwrap();
        match model {
            TrainedModel::KNNClassifier(ref knn) => {
                assert_eq!(knn.config().metric, crate::training::knn::DistanceMetric::Manhattan)
            }
            other => panic!("expected a knn classifier, got {:?}", other.kind()),
        }

        let spec = ModelSpec::DecisionTree(TreeParams {
            min_samples_leaf: 40,
            ..Default::default()
        });
        let model = train(&x, &y, &spec, 42).unwrap();
        // a leaf minimum equal to the row count leaves a single leaf
        match model {
            TrainedModel::DecisionTreeClassifier(ref tree) => assert_eq!(tree.get_n_leaves(), 1),
            other => panic!("expected a tree classifier, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_mismatched_criterion_falls_back() {
        let (x, y) = ramp();
        let spec = ModelSpec::DecisionTree(TreeParams {
            criterion: Some(Criterion::Gini),
            ..Default::default()
        });
        let model = train(&x, &y, &spec, 42).unwrap();
        assert_eq!(model.problem_type(), ProblemType::Regression);
    }
}
