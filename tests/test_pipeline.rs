//! End-to-end tests: upload, train, predict through pipelines and sessions

use kolosal_workbench::prelude::*;
use polars::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 100 rows, three numeric features, binary target driven by f1 + f2
fn binary_dataset() -> DataFrame {
    let f1: Vec<f64> = (0..100).map(|i| (i % 10) as f64).collect();
    let f2: Vec<f64> = (0..100).map(|i| ((i * 3) % 10) as f64).collect();
    let f3: Vec<f64> = (0..100).map(|i| ((i * 7) % 13) as f64 * 0.5).collect();
    let target: Vec<i64> = f1
        .iter()
        .zip(&f2)
        .map(|(a, b)| if a + b > 9.0 { 1 } else { 0 })
        .collect();
    df!("f1" => f1, "f2" => f2, "f3" => f3, "target" => target).unwrap()
}

fn features() -> Vec<String> {
    vec!["f1".into(), "f2".into(), "f3".into()]
}

#[test]
fn test_end_to_end_decision_tree() {
    let mut pipeline = Pipeline::new(binary_dataset(), "binary.csv", &WorkbenchConfig::default()).unwrap();
    let request = TrainingRequest::new(features(), "target", "decision_tree").with_split_ratio(70);
    let result = pipeline.train(&request).unwrap();

    assert_eq!(result.problem_type, ProblemType::Classification);
    assert_eq!(result.model_type, ModelKind::DecisionTree);
    assert_eq!(result.n_train_samples, 70);
    assert_eq!(result.n_test_samples, 30);
    assert_eq!(result.n_features, 3);
    assert_eq!(result.feature_names, features());
    assert_eq!(result.target_name, "target");

    assert_eq!(result.confusion_matrix.len(), 2);
    assert!(result.confusion_matrix.iter().all(|row| row.len() == 2));
    let total: u64 = result.confusion_matrix.iter().flatten().sum();
    assert_eq!(total, 30);

    for score in [
        result.test_metrics.accuracy,
        result.test_metrics.precision,
        result.test_metrics.recall,
        result.test_metrics.f1_score,
        result.train_metrics.accuracy,
    ] {
        assert!((0.0..=1.0).contains(&score));
    }
    assert!(result.regression_metrics.is_none());
    assert!(result.feature_importance.is_some());
    assert_eq!(result.predictions.actual.len(), 30);
    assert_eq!(result.predictions.predicted.len(), 30);
}

#[test]
fn test_result_serializes_wire_shape() {
    let mut pipeline = Pipeline::new(binary_dataset(), "binary.csv", &WorkbenchConfig::default()).unwrap();
    let request = TrainingRequest::new(features(), "target", "knn");
    let result = pipeline.train(&request).unwrap();

    let value = serde_json::to_value(&result).unwrap();
    for key in [
        "test_metrics",
        "train_metrics",
        "confusion_matrix",
        "predictions",
        "n_train_samples",
        "n_test_samples",
        "n_features",
        "feature_names",
        "target_name",
        "problem_type",
        "model_type",
    ] {
        assert!(value.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(value["problem_type"], json!("classification"));
    assert_eq!(value["model_type"], json!("knn"));
    assert!(value.get("feature_importance").is_none());
    assert!(value.get("regression_metrics").is_none());
}

#[test]
fn test_regression_run_reports_regression_metrics() {
    let x: Vec<f64> = (0..80).map(|i| i as f64 * 0.25).collect();
    let noise: Vec<f64> = (0..80).map(|i| ((i * 37) % 11) as f64 * 0.01).collect();
    let y: Vec<f64> = x.iter().zip(&noise).map(|(a, n)| 4.0 * a + 1.0 + n).collect();
    let df = df!("x" => x, "noise" => noise, "y" => y).unwrap();

    let mut pipeline = Pipeline::new(df, "line.csv", &WorkbenchConfig::default()).unwrap();
    let request = TrainingRequest::new(vec!["x".into(), "noise".into()], "y", "linear");
    let result = pipeline.train(&request).unwrap();

    assert_eq!(result.problem_type, ProblemType::Regression);
    let regression = result.regression_metrics.as_ref().unwrap();
    assert!(regression.r2_score > 0.99);
    assert!(result.test_metrics.accuracy > 0.99);
    assert_eq!(result.confusion_matrix, vec![vec![0, 0], vec![0, 0]]);
}

#[test]
fn test_single_valued_target_fails_selection() {
    let df = df!(
        "a" => (0..20).map(|i| i as f64).collect::<Vec<_>>(),
        "y" => vec![1i64; 20]
    )
    .unwrap();
    let mut pipeline = Pipeline::new(df, "flat.csv", &WorkbenchConfig::default()).unwrap();
    let err = pipeline
        .train(&TrainingRequest::new(vec!["a".into()], "y", "linear"))
        .unwrap_err();
    match &err {
        WorkbenchError::Selection { suggestion, .. } => assert!(!suggestion.is_empty()),
        other => panic!("expected selection error, got {:?}", other),
    }
    assert!(!FriendlyError::from_error(&err).suggestion.is_empty());
}

#[test]
fn test_unknown_model_type_fails() {
    let mut pipeline = Pipeline::new(binary_dataset(), "binary.csv", &WorkbenchConfig::default()).unwrap();
    let err = pipeline
        .train(&TrainingRequest::new(features(), "target", "gradient_magic"))
        .unwrap_err();
    assert!(matches!(err, WorkbenchError::UnknownModelType(_)));
    assert!(!pipeline.is_trained());
}

#[test]
fn test_training_is_reproducible() {
    let config = WorkbenchConfig::default();
    let request = TrainingRequest::new(features(), "target", "random_forest")
        .with_hyperparameter("n_estimators", json!(12));

    let mut first = Pipeline::new(binary_dataset(), "binary.csv", &config).unwrap();
    let mut second = Pipeline::new(binary_dataset(), "binary.csv", &config).unwrap();
    let a = first.train(&request).unwrap();
    let b = second.train(&request).unwrap();

    assert_eq!(a.test_metrics, b.test_metrics);
    assert_eq!(a.confusion_matrix, b.confusion_matrix);
    assert_eq!(a.predictions, b.predictions);
    assert_eq!(a.feature_importance, b.feature_importance);
}

#[test]
fn test_metrics_recompute_idempotent() {
    let mut pipeline = Pipeline::new(binary_dataset(), "binary.csv", &WorkbenchConfig::default()).unwrap();
    pipeline
        .train(&TrainingRequest::new(features(), "target", "svm"))
        .unwrap();
    let a = pipeline.recompute_metrics().unwrap();
    let b = pipeline.recompute_metrics().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_text_target_predictions_are_decoded() {
    let size: Vec<f64> = (0..40).map(|i| i as f64).collect();
    let kind: Vec<&str> = (0..40).map(|i| if i < 20 { "small" } else { "large" }).collect();
    let df = df!("size" => size, "kind" => kind).unwrap();

    let mut pipeline = Pipeline::new(df, "sizes.csv", &WorkbenchConfig::default()).unwrap();
    pipeline
        .train(&TrainingRequest::new(vec!["size".into()], "kind", "decision_tree"))
        .unwrap();

    let rows = df!("size" => &[3.0, 35.0]).unwrap();
    let predicted = pipeline.predict(&rows).unwrap();
    assert_eq!(
        predicted,
        vec![
            PredictedValue::Label("small".into()),
            PredictedValue::Label("large".into())
        ]
    );
}

#[test]
fn test_predict_missing_feature_column() {
    let mut pipeline = Pipeline::new(binary_dataset(), "binary.csv", &WorkbenchConfig::default()).unwrap();
    pipeline
        .train(&TrainingRequest::new(features(), "target", "linear"))
        .unwrap();
    let rows = df!("f1" => &[1.0], "f2" => &[2.0]).unwrap();
    assert!(matches!(
        pipeline.predict(&rows),
        Err(WorkbenchError::UnknownColumn(ref c)) if c == "f3"
    ));
}

#[test]
fn test_predict_text_in_numeric_feature_fails() {
    let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
    let y: Vec<i64> = (0..30).map(|i| if i < 15 { 0 } else { 1 }).collect();
    let mut pipeline = Pipeline::new(df!("x" => x, "y" => y).unwrap(), "x.csv", &WorkbenchConfig::default()).unwrap();
    pipeline
        .train(&TrainingRequest::new(vec!["x".into()], "y", "knn").with_hyperparameter("n_neighbors", json!(3)))
        .unwrap();

    let rows = df!("x" => &["abc", "29"]).unwrap();
    let err = pipeline.predict(&rows).unwrap_err();
    assert!(matches!(err, WorkbenchError::Preprocessing(ref msg) if msg.contains("'x'")));
    assert_eq!(FriendlyError::from_error(&err).message, "Data type mismatch");
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn test_sessions_are_isolated() {
    let store = SessionStore::new(WorkbenchConfig::default());
    let a = store.create(binary_dataset(), "a.csv").unwrap();
    let b = store.create(binary_dataset(), "b.csv").unwrap();
    assert_ne!(a, b);

    store
        .train(&a, &TrainingRequest::new(features(), "target", "knn"))
        .unwrap();
    let rows = df!("f1" => &[9.0], "f2" => &[9.0], "f3" => &[1.0]).unwrap();
    assert!(store.predict(&a, &rows).is_ok());
    assert!(matches!(store.predict(&b, &rows), Err(WorkbenchError::NoTrainedModel)));
}

#[test]
fn test_concurrent_predictions() {
    let store = Arc::new(SessionStore::new(WorkbenchConfig::default()));
    let id = store.create(binary_dataset(), "binary.csv").unwrap();
    store
        .train(&id, &TrainingRequest::new(features(), "target", "decision_tree"))
        .unwrap();

    let rows = df!("f1" => &[1.0, 9.0], "f2" => &[0.0, 9.0], "f3" => &[2.0, 2.0]).unwrap();
    let expected = store.predict(&id, &rows).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let rows = rows.clone();
            thread::spawn(move || store.predict(&id, &rows).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_retrain_while_predicting() {
    let store = Arc::new(SessionStore::new(WorkbenchConfig::default()));
    let id = store.create(binary_dataset(), "binary.csv").unwrap();
    store
        .train(&id, &TrainingRequest::new(features(), "target", "linear"))
        .unwrap();
    let rows = df!("f1" => &[1.0], "f2" => &[0.0], "f3" => &[2.0]).unwrap();

    let predictor = {
        let store = Arc::clone(&store);
        let rows = rows.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                let predicted = store.predict(&id, &rows).unwrap();
                assert_eq!(predicted.len(), 1);
            }
        })
    };
    store
        .train(&id, &TrainingRequest::new(features(), "target", "knn"))
        .unwrap();
    predictor.join().unwrap();

    let model = store.with_pipeline(&id, |p| Ok(p.model().map(|m| m.kind()))).unwrap();
    assert_eq!(model, Some(ModelKind::Knn));
}

#[test]
fn test_idle_sessions_are_evicted() {
    let config = WorkbenchConfig::default().with_session_idle_timeout(Duration::from_secs(5));
    let store = SessionStore::new(config);
    let first = store.create(binary_dataset(), "first.csv").unwrap();
    let second = store.create(binary_dataset(), "second.csv").unwrap();

    assert_eq!(store.evict_idle_at(Instant::now() + Duration::from_secs(1)), 0);
    assert_eq!(store.len(), 2);

    let later = Instant::now() + Duration::from_secs(10);
    assert_eq!(store.evict_idle_at(later), 2);
    assert!(matches!(store.get(&first), Err(WorkbenchError::SessionNotFound(_))));
    assert!(store.get(&second).is_err());
    assert!(store.is_empty());
}

#[test]
fn test_narration_context_is_capped() {
    let columns: Vec<Column> = (0..12)
        .map(|i| Column::new(format!("c{}", i).into(), (0..15).map(|v| v as f64).collect::<Vec<_>>()))
        .collect();
    let df = DataFrame::new(columns).unwrap();
    let pipeline = Pipeline::new(df, "wide.csv", &WorkbenchConfig::default()).unwrap();

    let ctx = pipeline.narration_context();
    assert_eq!(ctx.columns.len(), 8);
    assert_eq!(ctx.column_types.len(), 5);
    let value = serde_json::to_value(&ctx).unwrap();
    assert_eq!(value["fileName"], json!("wide.csv"));
}
