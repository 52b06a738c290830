//! Kolosal Workbench - guided no-code machine learning core
//!
//! Takes an uploaded table through the whole workbench flow:
//! validation, column profiling, feature/target selection checks,
//! preprocessing, train/test splitting, training one of six model families,
//! and scoring the result.
//!
//! # Modules
//!
//! - [`dataset`] - Validation, semantic typing, profiling, selection checks
//! - [`preprocessing`] - Imputation, label encoding, scaling
//! - [`training`] - Splitting, model families, metrics
//! - [`pipeline`] - End-to-end runs and the session store
//! - [`cli`] - Command-line interface
//!
//! ```no_run
//! use kolosal_workbench::prelude::*;
//! use polars::prelude::*;
//!
//! # fn main() -> kolosal_workbench::Result<()> {
//! let df = CsvReadOptions::default()
//!     .try_into_reader_with_file_path(Some("iris.csv".into()))?
//!     .finish()?;
//! let store = SessionStore::new(WorkbenchConfig::default());
//! let id = store.create(df, "iris.csv")?;
//! let request = TrainingRequest::new(
//!     vec!["sepal_length".into(), "petal_length".into()],
//!     "species",
//!     "random_forest",
//! );
//! let result = store.train(&id, &request)?;
//! println!("accuracy = {:.3}", result.test_metrics.accuracy);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod config;

pub mod dataset;
pub mod preprocessing;
pub mod training;
pub mod pipeline;

pub mod cli;

pub use error::{Result, WorkbenchError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ValidationConfig, WorkbenchConfig};
    pub use crate::error::{FriendlyError, Result, WorkbenchError};

    pub use crate::dataset::{DatasetProfile, NarrationContext, ProblemType, SemanticType};

    pub use crate::preprocessing::{DataPreprocessor, FittedTransformState, ImputeStrategy, PreprocessingConfig};

    pub use crate::training::{MetricsResult, ModelKind, ModelSpec, SplitResult, TrainedModel};

    pub use crate::pipeline::{
        Pipeline, PredictedValue, SessionId, SessionStore, TrainingRequest, TrainingResult,
    };
}
