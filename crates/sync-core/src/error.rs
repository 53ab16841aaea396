//! Error taxonomy for the metasync framework.
//!
//! Every failure a dialect or the framework can produce is a [`SyncError`]
//! variant carrying enough context (dialect, table, offending key or value)
//! for the calling tool to render an actionable message. The framework never
//! retries and never swallows errors; retry policy belongs to the caller.

use thiserror::Error;

/// Result alias used throughout the metasync crates.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed URI, missing required key, invalid load strategy, or a
    /// strategy that needs schema support the caller did not declare
    /// (e.g. UPSERT without key columns). Always raised before any I/O.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The URI named a protocol no registered dialect answers to.
    #[error("unknown dialect '{protocol}', known dialects are: {}", .known.join(", "))]
    UnknownDialect {
        protocol: String,
        known: Vec<String>,
    },

    /// Opening the backend handle failed. Carries the transport error.
    #[error("{dialect}: failed to connect: {source}")]
    Connection {
        dialect: String,
        #[source]
        source: anyhow::Error,
    },

    /// The target table exists with a shape the declared schema cannot be
    /// reconciled with by additive migration alone.
    #[error("{dialect}: table '{table}' has an incompatible schema: {detail}")]
    SchemaMismatch {
        dialect: String,
        table: String,
        detail: String,
    },

    /// A row value could not be represented in the declared column type.
    #[error("column '{column}': {detail}")]
    TypeCoercion { column: String, detail: String },

    /// The dialect was asked for an operation outside its capability set.
    #[error("{dialect} does not support {operation}")]
    Unsupported { dialect: String, operation: String },

    /// A backend call failed after the connection was established.
    #[error("{dialect}: {context}: {source}")]
    Backend {
        dialect: String,
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Shorthand for a [`SyncError::Backend`] wrapping any backend error.
    pub fn backend(
        dialect: impl Into<String>,
        context: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        SyncError::Backend {
            dialect: dialect.into(),
            context: context.into(),
            source: source.into(),
        }
    }

    /// Shorthand for a [`SyncError::Connection`] wrapping a transport error.
    pub fn connection(dialect: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        SyncError::Connection {
            dialect: dialect.into(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_dialect_lists_known_protocols() {
        let err = SyncError::UnknownDialect {
            protocol: "gsheets".to_string(),
            known: vec!["csv".to_string(), "sqlite".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("gsheets"));
        assert!(msg.contains("csv, sqlite"));
    }

    #[test]
    fn coercion_error_names_the_column() {
        let err = SyncError::TypeCoercion {
            column: "views".to_string(),
            detail: "FLOAT value 1.5 cannot be stored in an INTEGER column".to_string(),
        };
        assert!(err.to_string().starts_with("column 'views'"));
    }
}
