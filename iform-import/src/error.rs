//! Error types for iform-import
//!
//! Transport and decode failures, plus host misuse. Server-reported stage
//! errors, conflicts, incomplete match saves and row-level data errors are
//! not errors here; they surface as halts, pauses and summaries from the
//! orchestrator.

use thiserror::Error;

/// Import error type
#[derive(Debug, Error)]
pub enum ImportError {
    /// Request never produced an HTTP response (DNS, connect, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Warehouse answered with a non-success HTTP status
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Response body did not match the expected contract
    #[error("Parse error: {0}")]
    Parse(String),

    /// Caller supplied something unusable (bad token, unknown column)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Method called while the session is in the wrong stage
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// iform-common error
    #[error("Common error: {0}")]
    Common(#[from] iform_common::Error),
}

impl ImportError {
    /// Errors that come from the transport rather than the server's verdict
    pub fn is_transport(&self) -> bool {
        matches!(self, ImportError::Network(_) | ImportError::Api(_, _))
    }
}

impl From<reqwest::Error> for ImportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ImportError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            ImportError::Api(status.as_u16(), err.to_string())
        } else {
            ImportError::Network(err.to_string())
        }
    }
}

/// Result type for import operations
pub type ImportResult<T> = Result<T, ImportError>;
