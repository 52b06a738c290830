//! Model selection and typed hyperparameters

use super::decision_tree::Criterion;
use super::knn::{DistanceMetric, WeightScheme};
use super::neural_network::Activation;
use super::svm::{Gamma, Kernel};
use crate::error::{Result, WorkbenchError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Model family to train
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Logistic regression or ordinary least squares
    Linear,
    DecisionTree,
    RandomForest,
    Svm,
    Knn,
    NeuralNetwork,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        ModelKind::Linear,
        ModelKind::DecisionTree,
        ModelKind::RandomForest,
        ModelKind::Svm,
        ModelKind::Knn,
        ModelKind::NeuralNetwork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::DecisionTree => "decision_tree",
            ModelKind::RandomForest => "random_forest",
            ModelKind::Svm => "svm",
            ModelKind::Knn => "knn",
            ModelKind::NeuralNetwork => "neural_network",
        }
    }
}

impl FromStr for ModelKind {
    type Err = WorkbenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear" | "logistic" => Ok(ModelKind::Linear),
            "decision_tree" => Ok(ModelKind::DecisionTree),
            "random_forest" => Ok(ModelKind::RandomForest),
            "svm" => Ok(ModelKind::Svm),
            "knn" => Ok(ModelKind::Knn),
            "neural_network" => Ok(ModelKind::NeuralNetwork),
            _ => Err(WorkbenchError::UnknownModelType(s.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    pub max_iterations: usize,
    /// Inverse L2 strength; classification only
    pub c: f64,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            c: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// `None` grows until leaves are pure
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Left to the problem type when unset
    pub criterion: Option<Criterion>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            criterion: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    pub c: f64,
    pub kernel: Kernel,
    pub gamma: Gamma,
    pub degree: u32,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: Kernel::Rbf,
            gamma: Gamma::Scale,
            degree: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnParams {
    pub n_neighbors: usize,
    pub weights: WeightScheme,
    pub metric: DistanceMetric,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            weights: WeightScheme::Uniform,
            metric: DistanceMetric::Euclidean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpParams {
    pub hidden_layer_sizes: Vec<usize>,
    pub max_iterations: usize,
    pub learning_rate: f64,
    pub activation: Activation,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden_layer_sizes: vec![100],
            max_iterations: 500,
            learning_rate: 0.001,
            activation: Activation::ReLU,
        }
    }
}

/// A model family together with its parsed hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type", content = "params", rename_all = "snake_case")]
pub enum ModelSpec {
    Linear(LinearParams),
    DecisionTree(TreeParams),
    RandomForest(ForestParams),
    Svm(SvmParams),
    Knn(KnnParams),
    NeuralNetwork(MlpParams),
}

impl ModelSpec {
    /// Defaults for the family
    pub fn default_for(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Linear => ModelSpec::Linear(LinearParams::default()),
            ModelKind::DecisionTree => ModelSpec::DecisionTree(TreeParams::default()),
            ModelKind::RandomForest => ModelSpec::RandomForest(ForestParams::default()),
            ModelKind::Svm => ModelSpec::Svm(SvmParams::default()),
            ModelKind::Knn => ModelSpec::Knn(KnnParams::default()),
            ModelKind::NeuralNetwork => ModelSpec::NeuralNetwork(MlpParams::default()),
        }
    }

    /// Parse a request's model name and JSON hyperparameters.
    pub fn from_request(model_type: &str, hyperparameters: &HashMap<String, Value>) -> Result<Self> {
        let kind: ModelKind = model_type.parse()?;
        Self::parse(kind, hyperparameters)
    }

    pub fn parse(kind: ModelKind, hyperparameters: &HashMap<String, Value>) -> Result<Self> {
        let mut params = Params::new(hyperparameters);

        let spec = match kind {
            ModelKind::Linear => {
                let defaults = LinearParams::default();
                ModelSpec::Linear(LinearParams {
                    max_iterations: params.max_iterations()?.unwrap_or(defaults.max_iterations),
                    c: params.positive_f64("C")?.unwrap_or(defaults.c),
                })
            }
            ModelKind::DecisionTree => {
                let defaults = TreeParams::default();
                ModelSpec::DecisionTree(TreeParams {
                    max_depth: params.max_depth()?,
                    min_samples_split: params
                        .min_samples_split()?
                        .unwrap_or(defaults.min_samples_split),
                    min_samples_leaf: params
                        .positive_usize("min_samples_leaf")?
                        .unwrap_or(defaults.min_samples_leaf),
                    criterion: params.parsed("criterion", parse_criterion)?,
                })
            }
            ModelKind::RandomForest => {
                let defaults = ForestParams::default();
                ModelSpec::RandomForest(ForestParams {
                    n_estimators: params
                        .positive_usize("n_estimators")?
                        .unwrap_or(defaults.n_estimators),
                    max_depth: params.max_depth()?,
                    min_samples_split: params
                        .min_samples_split()?
                        .unwrap_or(defaults.min_samples_split),
                    min_samples_leaf: params
                        .positive_usize("min_samples_leaf")?
                        .unwrap_or(defaults.min_samples_leaf),
                })
            }
            ModelKind::Svm => {
                let defaults = SvmParams::default();
                ModelSpec::Svm(SvmParams {
                    c: params.positive_f64("C")?.unwrap_or(defaults.c),
                    kernel: params
                        .parsed("kernel", |s| s.parse::<Kernel>())?
                        .unwrap_or(defaults.kernel),
                    gamma: params.gamma()?.unwrap_or(defaults.gamma),
                    degree: params
                        .positive_usize("degree")?
                        .map(|d| d.min(u32::MAX as usize) as u32)
                        .unwrap_or(defaults.degree),
                })
            }
            ModelKind::Knn => {
                let defaults = KnnParams::default();
                ModelSpec::Knn(KnnParams {
                    n_neighbors: params
                        .positive_usize("n_neighbors")?
                        .unwrap_or(defaults.n_neighbors),
                    weights: params
                        .parsed("weights", |s| s.parse::<WeightScheme>())?
                        .unwrap_or(defaults.weights),
                    metric: params
                        .parsed("metric", |s| s.parse::<DistanceMetric>())?
                        .unwrap_or(defaults.metric),
                })
            }
            ModelKind::NeuralNetwork => {
                let defaults = MlpParams::default();
                ModelSpec::NeuralNetwork(MlpParams {
                    hidden_layer_sizes: params
                        .layer_sizes("hidden_layer_sizes")?
                        .unwrap_or(defaults.hidden_layer_sizes),
                    max_iterations: params.max_iterations()?.unwrap_or(defaults.max_iterations),
                    learning_rate: params
                        .positive_f64("learning_rate")?
                        .unwrap_or(defaults.learning_rate),
                    activation: params
                        .parsed("activation", |s| s.parse::<Activation>())?
                        .unwrap_or(defaults.activation),
                })
            }
        };

        params.log_ignored(kind);
        Ok(spec)
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ModelSpec::Linear(_) => ModelKind::Linear,
            ModelSpec::DecisionTree(_) => ModelKind::DecisionTree,
            ModelSpec::RandomForest(_) => ModelKind::RandomForest,
            ModelSpec::Svm(_) => ModelKind::Svm,
            ModelSpec::Knn(_) => ModelKind::Knn,
            ModelSpec::NeuralNetwork(_) => ModelKind::NeuralNetwork,
        }
    }
}

fn parse_criterion(s: &str) -> std::result::Result<Criterion, String> {
    match s.to_lowercase().as_str() {
        "gini" => Ok(Criterion::Gini),
        "entropy" => Ok(Criterion::Entropy),
        "mse" | "squared_error" => Ok(Criterion::Mse),
        other => Err(format!(
            "unknown criterion '{}', expected gini, entropy or squared_error",
            other
        )),
    }
}

/// Typed reads over a JSON hyperparameter map, remembering which keys were used
struct Params<'a> {
    raw: &'a HashMap<String, Value>,
    used: BTreeSet<&'static str>,
}

impl<'a> Params<'a> {
    fn new(raw: &'a HashMap<String, Value>) -> Self {
        Self {
            raw,
            used: BTreeSet::new(),
        }
    }

    /// Value for `name`; JSON null counts as absent.
    fn get(&mut self, name: &'static str) -> Option<&'a Value> {
        self.used.insert(name);
        self.raw.get(name).filter(|v| !v.is_null())
    }

    fn f64(&mut self, name: &'static str) -> Result<Option<f64>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(WorkbenchError::invalid_hyperparameter(name, value, "expected a number")),
        }
    }

    fn positive_f64(&mut self, name: &'static str) -> Result<Option<f64>> {
        match self.f64(name)? {
            Some(v) if v <= 0.0 => Err(WorkbenchError::invalid_hyperparameter(name, v, "must be positive")),
            other => Ok(other),
        }
    }

    fn usize(&mut self, name: &'static str) -> Result<Option<usize>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        as_usize(value)
            .map(Some)
            .ok_or_else(|| WorkbenchError::invalid_hyperparameter(name, value, "expected a non-negative integer"))
    }

    fn positive_usize(&mut self, name: &'static str) -> Result<Option<usize>> {
        match self.usize(name)? {
            Some(0) => Err(WorkbenchError::invalid_hyperparameter(name, 0, "must be at least 1")),
            other => Ok(other),
        }
    }

    /// `max_iterations`, or its short form `max_iter` when the long one is absent
    fn max_iterations(&mut self) -> Result<Option<usize>> {
        let long = self.positive_usize("max_iterations")?;
        let short = self.positive_usize("max_iter")?;
        Ok(long.or(short))
    }

    fn max_depth(&mut self) -> Result<Option<usize>> {
        self.positive_usize("max_depth")
    }

    fn min_samples_split(&mut self) -> Result<Option<usize>> {
        match self.usize("min_samples_split")? {
            Some(n) if n < 2 => Err(WorkbenchError::invalid_hyperparameter(
                "min_samples_split",
                n,
                "must be at least 2",
            )),
            other => Ok(other),
        }
    }

    /// String-valued key run through `parse`
    fn parsed<T, F>(&mut self, name: &'static str, parse: F) -> Result<Option<T>>
    where
        F: FnOnce(&str) -> std::result::Result<T, String>,
    {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        match value.as_str() {
            Some(s) => parse(s)
                .map(Some)
                .map_err(|reason| WorkbenchError::invalid_hyperparameter(name, value, reason)),
            None => Err(WorkbenchError::invalid_hyperparameter(name, value, "expected a string")),
        }
    }

    /// `"scale"`, `"auto"` or a positive number
    fn gamma(&mut self) -> Result<Option<Gamma>> {
        let Some(value) = self.get("gamma") else {
            return Ok(None);
        };
        if let Some(s) = value.as_str() {
            match s.trim().to_lowercase().as_str() {
                "scale" => return Ok(Some(Gamma::Scale)),
                "auto" => return Ok(Some(Gamma::Auto)),
                _ => {}
            }
        }
        match self.f64("gamma")? {
            Some(g) if g > 0.0 => Ok(Some(Gamma::Value(g))),
            _ => Err(WorkbenchError::invalid_hyperparameter(
                "gamma",
                value,
                "expected 'scale', 'auto' or a positive number",
            )),
        }
    }

    /// A single size or a list of sizes
    fn layer_sizes(&mut self, name: &'static str) -> Result<Option<Vec<usize>>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let sizes: Option<Vec<usize>> = match value {
            Value::Array(items) => items.iter().map(as_usize).collect(),
            Value::String(s) => s
                .split(',')
                .map(|part| part.trim().parse::<usize>().ok())
                .collect(),
            other => as_usize(other).map(|n| vec![n]),
        };
        match sizes {
            Some(sizes) if !sizes.is_empty() && sizes.iter().all(|&n| n > 0) => Ok(Some(sizes)),
            _ => Err(WorkbenchError::invalid_hyperparameter(
                name,
                value,
                "expected positive layer sizes such as [100] or [64, 32]",
            )),
        }
    }

    fn log_ignored(&self, kind: ModelKind) {
        for key in self.raw.keys().filter(|k| !self.used.contains(k.as_str())) {
            debug!(model_type = %kind, key = %key, "Ignoring unrecognised hyperparameter");
        }
    }
}

/// Non-negative integer from a JSON number (integral floats allowed) or numeric string
fn as_usize(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as usize).or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= usize::MAX as f64)
                .map(|f| f as usize)
        }),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    }
}
