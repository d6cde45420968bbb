//! Error types for the dataflow engine

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the dataflow engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad graph shape (missing parent, dangling connection, cycle)
    #[error("{0}")]
    Structural(String),

    /// An entity looked up by id does not exist
    #[error("Unknown {kind}")]
    NotFound { kind: &'static str, id: String },

    /// A node execution function failed
    #[error("Node execution failed: {0}")]
    Execution(String),

    /// A whole upload file or stream failed outside of per-record validation
    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    /// A node type that owns a nested context was executed without one,
    /// or the other way around
    #[error("Missing context function")]
    MissingContextFunction,

    /// The node type rejected its resolved input values
    #[error("Invalid input")]
    InvalidInput,

    /// The node type rejected its form
    #[error("Invalid form")]
    InvalidForm,

    /// No node type is registered under the given identifier
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Execution observed a cancellation request
    #[error("Calculation cancelled")]
    Cancelled,

    /// Persistence layer failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration could not be loaded or saved
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an execution error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a structural error with a message
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    /// Create a not-found error for the given entity kind
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error is the result of a cancellation request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
