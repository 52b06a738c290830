//! Command-line interface
//!
//! `profile` reports what the upload step would show for a CSV; `train` runs
//! one training request end to end and prints the result as JSON.

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::WorkbenchConfig;
use crate::error::{FriendlyError, WorkbenchError};
use crate::pipeline::{Pipeline, TrainingRequest};
use crate::preprocessing::{ImputeStrategy, PreprocessingConfig};
use crate::training::ModelKind;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    eprint!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    eprintln!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    eprintln!();
    eprintln!("  {}", title.white().bold());
    eprintln!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-workbench")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Guided no-code machine learning workbench")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum StrategyArg {
    Mean,
    Median,
    MostFrequent,
}

impl From<StrategyArg> for ImputeStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Mean => ImputeStrategy::Mean,
            StrategyArg::Median => ImputeStrategy::Median,
            StrategyArg::MostFrequent => ImputeStrategy::MostFrequent,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a CSV file and print its column profile
    Profile {
        /// Input CSV file
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Train a model and print its metrics
    Train {
        /// Input CSV file
        #[arg(short, long)]
        data: PathBuf,

        /// Target column name
        #[arg(short, long)]
        target: String,

        /// Comma-separated feature columns; defaults to every other column
        #[arg(short, long, value_delimiter = ',')]
        features: Vec<String>,

        /// Model type (linear, decision_tree, random_forest, svm, knn, neural_network)
        #[arg(short, long, default_value = "random_forest")]
        model: String,

        /// Percentage of rows used for training
        #[arg(long, default_value_t = 70)]
        split: u32,

        /// Standardize features to zero mean and unit variance
        #[arg(long)]
        standardize: bool,

        /// Min-max scale features to [0, 1]
        #[arg(long)]
        normalize: bool,

        /// Leave missing values in place instead of imputing them
        #[arg(long)]
        no_impute: bool,

        /// Imputation strategy for numeric columns
        #[arg(long, value_enum, default_value = "mean")]
        strategy: StrategyArg,

        /// Hyperparameters as a JSON object, e.g. '{"max_depth": 5}'
        #[arg(long)]
        params: Option<String>,

        /// CSV of new rows to score with the trained model
        #[arg(long)]
        predict: Option<PathBuf>,
    },
}

/// Options for one `train` invocation
pub struct TrainArgs<'a> {
    pub data: &'a Path,
    pub target: &'a str,
    pub features: &'a [String],
    pub model: &'a str,
    pub split: u32,
    pub preprocessing: PreprocessingConfig,
    pub params: Option<&'a str>,
    pub predict: Option<&'a Path>,
}

// ─── Data loading ──────────────────────────────────────────────────────────────

pub fn load_csv(path: &Path) -> anyhow::Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(1000))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

fn parse_params(raw: Option<&str>) -> anyhow::Result<HashMap<String, serde_json::Value>> {
    match raw {
        None => Ok(HashMap::new()),
        Some(text) => {
            let params: HashMap<String, serde_json::Value> = serde_json::from_str(text)
                .map_err(|e| anyhow::anyhow!("--params must be a JSON object: {}", e))?;
            Ok(params)
        }
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_profile(data_path: &Path, config: &WorkbenchConfig) -> anyhow::Result<()> {
    section("Profile");

    step_run("Loading data");
    let start = Instant::now();
    let df = load_csv(data_path)?;
    step_done(&format!("{} rows × {} cols in {:?}", df.height(), df.width(), start.elapsed()));

    let pipeline = Pipeline::new(df, file_name(data_path), config)?;
    println!("{}", serde_json::to_string_pretty(pipeline.profile())?);
    Ok(())
}

pub fn cmd_train(args: TrainArgs<'_>, config: &WorkbenchConfig) -> anyhow::Result<()> {
    section("Train");

    step_run("Loading data");
    let start = Instant::now();
    let df = load_csv(args.data)?;
    step_done(&format!("{} rows × {} cols in {:?}", df.height(), df.width(), start.elapsed()));

    let features: Vec<String> = if args.features.is_empty() {
        df.get_column_names()
            .iter()
            .map(|c| c.to_string())
            .filter(|c| c != args.target)
            .collect()
    } else {
        args.features.iter().map(|f| f.trim().to_string()).collect()
    };

    let mut pipeline = Pipeline::new(df, file_name(args.data), config)?;
    let mut request = TrainingRequest::new(features, args.target, args.model)
        .with_preprocessing(args.preprocessing)
        .with_split_ratio(args.split);
    request.hyperparameters = parse_params(args.params)?;

    let kind: ModelKind = args.model.parse()?;
    step_run(&format!("Training {}", kind.to_string().cyan()));
    let result = pipeline.train(&request)?;
    step_done(&format!("{:.3}s", result.training_time_secs));

    eprintln!();
    eprintln!(
        "  {:<16} {}",
        muted("Accuracy"),
        format!("{:.4}", result.test_metrics.accuracy).white().bold()
    );
    if let Some(regression) = &result.regression_metrics {
        eprintln!("  {:<16} {}", muted("R²"), format!("{:.4}", regression.r2_score).white());
        eprintln!("  {:<16} {}", muted("RMSE"), format!("{:.4}", regression.rmse).white());
    }
    eprintln!();

    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(path) = args.predict {
        step_run("Scoring new rows");
        let rows = load_csv(path)?;
        let predictions = pipeline.predict(&rows)?;
        step_done(&format!("{} rows", predictions.len()));
        println!("{}", serde_json::to_string_pretty(&predictions)?);
    }

    Ok(())
}

/// Dispatch a parsed command line
pub fn run(cli: Cli, config: &WorkbenchConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Profile { data } => cmd_profile(&data, config),
        Commands::Train {
            data,
            target,
            features,
            model,
            split,
            standardize,
            normalize,
            no_impute,
            strategy,
            params,
            predict,
        } => {
            let preprocessing = PreprocessingConfig::new()
                .with_handle_missing(!no_impute)
                .with_missing_strategy(strategy.into())
                .with_standardization(standardize)
                .with_normalization(normalize);
            cmd_train(
                TrainArgs {
                    data: &data,
                    target: &target,
                    features: &features,
                    model: &model,
                    split,
                    preprocessing,
                    params: params.as_deref(),
                    predict: predict.as_deref(),
                },
                config,
            )
        }
    }
}

/// Print a failure the way the workbench shows it to users
pub fn report_error(err: &anyhow::Error) {
    let friendly = match err.downcast_ref::<WorkbenchError>() {
        Some(workbench) => FriendlyError::from_error(workbench),
        None => FriendlyError::from_message(&err.to_string()),
    };
    eprintln!();
    eprintln!("  {} {}", "✗".red().bold(), friendly.message.red());
    eprintln!("  {} {}", muted("hint"), friendly.suggestion);
    eprintln!("  {}", dim(&err.to_string()));
    eprintln!();
}
