//! Error types for rt-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that escape a load, roll, or resolve operation
///
/// Problems in table *content* (bad directives, bad expressions, bad
/// roll ranges) never show up here; they are reported through a
/// [`DiagnosticSink`](crate::diagnostic::DiagnosticSink) instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse CSV
    #[error("failed to parse CSV '{path}': {message}")]
    CsvParse { path: PathBuf, message: String },

    /// CSV parsing error from the csv crate
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A table has a header but no rows to roll on
    #[error("table '{0}' has no rows")]
    EmptyTable(PathBuf),

    /// Resolution could not continue
    #[error("pass {pass}: {op}: {message}")]
    Resolve {
        pass: usize,
        op: String,
        message: String,
    },

    /// Caller asked for fields a table does not declare
    #[error("{} does not have the following fields: {}", path.display(), fields.join(", "))]
    InvalidField { path: PathBuf, fields: Vec<String> },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short kind name, used by the CLI when reporting fatal errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::FileRead { .. } | Error::Io(_) => "FileReadError",
            Error::CsvParse { .. } | Error::Csv { .. } => "CsvError",
            Error::EmptyTable(_) => "EmptyTableError",
            Error::Resolve { .. } => "ResolveError",
            Error::InvalidField { .. } => "InvalidFieldError",
            Error::Json(_) => "JsonError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_message() {
        let err = Error::Resolve {
            pass: 3,
            op: "${~[hp]}".to_string(),
            message: "'~' must not be the first reference".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "pass 3: ${~[hp]}: '~' must not be the first reference"
        );
        assert_eq!(err.kind_name(), "ResolveError");
    }

    #[test]
    fn test_invalid_field_message() {
        let err = Error::InvalidField {
            path: PathBuf::from("names.csv"),
            fields: vec!["age".to_string(), "rank".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "names.csv does not have the following fields: age, rank"
        );
    }
}
