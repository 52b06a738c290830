//! Workbench-wide configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds applied by the dataset validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum number of rows for a trainable dataset
    pub min_rows: usize,
    /// Minimum number of columns (at least one feature plus the target)
    pub min_columns: usize,
    /// A column with a missing percentage above this is rejected
    pub max_missing_pct: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_rows: 10,
            min_columns: 2,
            max_missing_pct: 90.0,
        }
    }
}

/// Top-level configuration shared by pipelines and the session store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbenchConfig {
    /// Seed for splitting and every randomized model
    pub random_seed: u64,
    /// Train percentage used when a request omits it
    pub default_split_ratio: u32,
    /// Sessions untouched for longer than this are evicted
    pub session_idle_timeout_secs: u64,
    pub validation: ValidationConfig,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            random_seed: 42,
            default_split_ratio: 70,
            session_idle_timeout_secs: 3600,
            validation: ValidationConfig::default(),
        }
    }
}

impl WorkbenchConfig {
    /// Defaults overridden by `WORKBENCH_SEED`, `WORKBENCH_SESSION_TTL_SECS`
    /// and `WORKBENCH_MIN_ROWS` when set and parseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(seed) = env_parse("WORKBENCH_SEED") {
            config.random_seed = seed;
        }
        if let Some(ttl) = env_parse("WORKBENCH_SESSION_TTL_SECS") {
            config.session_idle_timeout_secs = ttl;
        }
        if let Some(min_rows) = env_parse("WORKBENCH_MIN_ROWS") {
            config.validation.min_rows = min_rows;
        }
        config
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
