//! Label encoding for categorical columns

use crate::error::{Result, WorkbenchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Category to dense integer mapping. Codes follow the sorted order of the
/// observed categories, so the same data always yields the same codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoding {
    classes: Vec<String>,
}

impl LabelEncoding {
    /// Learn the categories present in `values`; missing entries are skipped.
    pub fn fit(values: &[Option<String>]) -> Self {
        let classes: BTreeSet<&str> = values.iter().flatten().map(String::as_str).collect();
        Self {
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn code(&self, category: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(category))
            .ok()
    }

    pub fn decode(&self, code: usize) -> Option<&str> {
        self.classes.get(code).map(String::as_str)
    }

    /// Encode a fully observed column. `column` names the source in errors.
    pub fn encode(&self, column: &str, values: &[Option<String>]) -> Result<Vec<f64>> {
        values
            .iter()
            .map(|value| match value {
                Some(category) => self.code(category).map(|c| c as f64).ok_or_else(|| {
                    WorkbenchError::Preprocessing(format!(
                        "unseen category '{}' in column '{}'",
                        category, column
                    ))
                }),
                None => Err(WorkbenchError::Preprocessing(format!(
                    "column '{}' contains null values after imputation",
                    column
                ))),
            })
            .collect()
    }
}
