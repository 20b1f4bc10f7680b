//! Fatal errors and non-fatal warnings raised while analysing an upload.
//!
//! Only [`AnalysisError`] aborts a run. Everything else is collected as a
//! [`Warning`] and travels inside the artifacts so a caller can tell "no
//! result" apart from "a complete result with caveats".

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type for the fatal stages (ingestion).
pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisError {
    /// The buffer could not be decoded into rows and columns.
    #[error("format error in '{source_name}': {message}")]
    Format {
        source_name: String,
        message: String,
    },

    /// The buffer decoded fine but holds no data rows.
    #[error("'{source_name}' contains no data rows")]
    EmptyInput { source_name: String },
}

impl AnalysisError {
    pub fn format(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        AnalysisError::Format {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn empty(source_name: impl Into<String>) -> Self {
        AnalysisError::EmptyInput {
            source_name: source_name.into(),
        }
    }

    pub fn source_name(&self) -> &str {
        match self {
            AnalysisError::Format { source_name, .. } => source_name,
            AnalysisError::EmptyInput { source_name } => source_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A cell could not be cleaned and was left as-is.
    PartialCleaning {
        table: String,
        column: String,
        rows: Vec<usize>,
        message: String,
    },
    /// A relationship was detected but its confidence is below the constraint cutoff.
    LowConfidenceRelationship {
        from_table: String,
        from_column: String,
        to_table: String,
        to_column: String,
        confidence: f64,
    },
    /// A primary key candidate is below the constraint cutoff.
    LowConfidenceKey {
        table: String,
        columns: Vec<String>,
        confidence: f64,
    },
    /// An edge pointed at a table or column that was not emitted and was dropped.
    DanglingReference {
        from_table: String,
        from_column: String,
        to_table: String,
        to_column: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::PartialCleaning {
                table,
                column,
                rows,
                message,
            } => write!(
                f,
                "{table}.{column}: {message} ({} row(s) left unresolved)",
                rows.len()
            ),
            Warning::LowConfidenceRelationship {
                from_table,
                from_column,
                to_table,
                to_column,
                confidence,
            } => write!(
                f,
                "possible relationship {from_table}.{from_column} -> {to_table}.{to_column} \
                 (confidence {confidence:.2}) not emitted as a constraint"
            ),
            Warning::LowConfidenceKey {
                table,
                columns,
                confidence,
            } => write!(
                f,
                "possible primary key {table}({}) (confidence {confidence:.2}) not emitted as a constraint",
                columns.join(", ")
            ),
            Warning::DanglingReference {
                from_table,
                from_column,
                to_table,
                to_column,
            } => write!(
                f,
                "dropped relationship {from_table}.{from_column} -> {to_table}.{to_column}: \
                 endpoint not present in the emitted schema"
            ),
        }
    }
}
