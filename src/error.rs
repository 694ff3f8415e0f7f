//! Error types for the lanegraph library
//!
//! Only recoverable conditions and caller mistakes are errors. Broken
//! algorithmic invariants inside the layout builder (a lane released twice, a
//! row consumed out of order) are programming errors and panic instead of
//! being reported here.

use thiserror::Error;

use crate::types::Row;

/// Type alias for Results in the lanegraph library
pub type Result<T> = std::result::Result<T, GraphError>;

/// Main error type for all graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    /// I/O errors while reading commit dumps or configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Identifier is not valid hex or is too short/long
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Source index was never registered
    #[error("Unknown source: {0}")]
    UnknownSource(usize),

    /// Source was already marked exhausted and cannot grow
    #[error("Source {0} is exhausted and cannot accept more commits")]
    SourceExhausted(usize),

    /// Row lies beyond what has been loaded so far
    #[error("Row {row} is not yet available (frontier is {frontier})")]
    RowNotYetAvailable {
        /// Requested row
        row: Row,
        /// Number of rows currently laid out
        frontier: Row,
    },

    /// Row will never exist: the stream is exhausted below it
    #[error("Row {row} is out of range ({len} rows in total)")]
    RowOutOfRange {
        /// Requested row
        row: Row,
        /// Final number of rows
        len: Row,
    },

    /// No loaded commit matches the identifier
    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    /// Lane layout was switched off because the input order cannot be trusted
    #[error("Lane layout is disabled: input stream is not time ordered")]
    LayoutDisabled,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GraphError {
    /// Create an invalid configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        GraphError::InvalidConfiguration(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        GraphError::Internal(msg.into())
    }

    /// Check if retrying later may succeed
    ///
    /// True for rows that have not been loaded yet. Slow producers are a
    /// normal state, so callers usually render a placeholder and ask again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GraphError::RowNotYetAvailable { .. })
    }

    /// Check if the answer will never change for the current load
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            GraphError::RowOutOfRange { .. }
                | GraphError::CommitNotFound(_)
                | GraphError::UnknownSource(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            GraphError::RowNotYetAvailable { row, frontier } => {
                format!("Row {} is still loading ({} rows ready). Try again shortly.", row, frontier)
            }
            GraphError::LayoutDisabled => {
                "The commit graph cannot be drawn for this view because the history is filtered out of order. \
                 Clear the filter to restore lanes."
                    .to_string()
            }
            GraphError::InvalidIdentifier(id) => {
                format!("'{}' is not a commit hash. Use at least 7 hex characters.", id)
            }
            _ => self.to_string(),
        }
    }
}
