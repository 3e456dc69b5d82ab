//! Error types for the coordination store.

use thiserror::Error;

/// Result type alias for coordination store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during coordination store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("no node: {0}")]
    NoNode(String),

    #[error("bad version for {path}: expected {expected}, found {actual}")]
    BadVersion {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("session {0} is closed")]
    SessionClosed(u64),

    #[error("transaction failed at op {index}: {source}")]
    TransactionFailed {
        index: usize,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// The error of the failing op when this is a [`StoreError::TransactionFailed`].
    pub fn op_failure(&self) -> Option<(usize, &StoreError)> {
        match self {
            StoreError::TransactionFailed { index, source } => Some((*index, source)),
            _ => None,
        }
    }
}
