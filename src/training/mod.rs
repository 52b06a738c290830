//! Model training module
//!
//! Six model families, each in a classification and a regression flavour:
//! - Linear models (logistic regression, OLS)
//! - Decision trees and Random Forests
//! - Support Vector Machines
//! - K-Nearest Neighbors
//! - Neural networks (MLP)
//!
//! plus the train/test splitter and the metrics calculator.

mod config;
mod engine;
pub mod decision_tree;
pub mod knn;
pub mod linear_models;
pub mod metrics;
pub mod neural_network;
pub mod random_forest;
pub mod split;
pub mod svm;

pub use config::{
    ForestParams, KnnParams, LinearParams, MlpParams, ModelKind, ModelSpec, SvmParams, TreeParams,
};
pub use decision_tree::{Criterion, DecisionTree, TreeNode};
pub use engine::{problem_type_for, train, ImportanceKind, TrainedModel, CLASSIFICATION_MAX_CLASSES};
pub use knn::{DistanceMetric, KNNClassifier, KNNConfig, KNNRegressor, WeightScheme};
pub use linear_models::{LinearRegression, LogisticClassifier, LogisticRegression};
pub use metrics::{
    compute, Averaging, ClassificationMetrics, MetricsResult, RegressionAliases, RegressionMetrics,
    ScoreSet, Scores, TrainScores,
};
pub use neural_network::{Activation, MLPClassifier, MLPConfig, MLPRegressor};
pub use random_forest::{MaxFeatures, RandomForest};
pub use split::{split, SplitResult, Splitter};
pub use svm::{Gamma, Kernel, SVMClassifier, SVMConfig, SVMRegressor};
