//! Error types for translation, configuration and dispatch

use thiserror::Error;

use crate::operator::{BackendFamily, Operator};

/// Boxed error from a backend driver, kept as the source so native detail survives.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration error, raised before any query is translated
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown engine type: {0}")]
    UnknownEngine(String),

    #[error("missing connection field: {0}")]
    MissingField(&'static str),

    #[error("invalid value {value:?} for option {key}")]
    InvalidOption { key: String, value: String },

    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure to turn a request into a native query. Always raised before I/O.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    #[error("column {column} does not exist in {table}")]
    UnknownColumn { table: String, column: String },

    #[error("{family} backends do not support operator {operator}")]
    UnsupportedOperator { family: BackendFamily, operator: Operator },

    #[error("{family} backends cannot express this condition: {reason}")]
    UnsupportedConditionShape { family: BackendFamily, reason: String },

    #[error("{family} backends cannot sort results")]
    UnsupportedSort { family: BackendFamily },

    #[error("{family} backends cannot page to this window: {reason}")]
    PaginationUnsupported { family: BackendFamily, reason: String },

    #[error("{operator} on {column} requires a non-empty value list")]
    EmptyValueList { column: String, operator: Operator },

    #[error("{operator} on {column} expects {expected}")]
    OperandShape { column: String, operator: Operator, expected: &'static str },

    #[error("comparison of {column} against NULL never matches; use IS NULL")]
    NullOperand { column: String },

    #[error("cannot convert {value} to {target} for column {column}")]
    Coercion { column: String, value: String, target: String },

    #[error("identifier {0:?} cannot be escaped")]
    UnescapableIdentifier(String),

    #[error("page limit must be greater than zero")]
    InvalidPage,
}

/// Error returned by a dispatched operation
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error("connection error: {0}")]
    Connection(#[source] DriverError),

    #[error("execution error: {0}")]
    Execution(#[source] DriverError),

    #[error("operation cancelled")]
    Cancelled,
}

pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    /// Whether the caller may reasonably retry. Retrying is never done here.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueryError::Connection(_) | QueryError::Cancelled)
    }
}
