//! Error types for hystore

use thiserror::Error;

use crate::filter::FilterError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be reached within the retry budget.
    #[error("connection error: {0}")]
    Connection(String),

    /// Extension, table, or index bootstrap failed.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error("duplicate document id: {id}")]
    Duplicate { id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Engine failure during a read or write. Never carries SQL text.
    #[error("{operation} failed: {source}")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Wrap an engine error with the name of the operation that hit it.
    pub fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Query { operation, source }
    }

    /// Stable machine-readable code for robot output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::Schema(_) => "schema_error",
            Self::Filter(_) => "filter_error",
            Self::Duplicate { .. } => "duplicate_error",
            Self::Validation(_) => "validation_error",
            Self::Query { .. } => "query_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Whether a retry could plausibly succeed without caller changes.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
