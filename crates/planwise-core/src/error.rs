//! Error types for planwise-core

use thiserror::Error;

/// Result type alias using planwise-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in planwise-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Remote store failure
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Operation requires connectivity but the client is offline
    #[error("Operation requires connectivity but the client is offline")]
    Offline,

    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures reported by a remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The client knows it has no connectivity
    #[error("remote store is unreachable (offline)")]
    Offline,

    /// Transport failure or server-side error
    #[error("network failure: {0}")]
    Network(String),

    /// No valid session for the remote store
    #[error("not authenticated")]
    Unauthenticated,

    /// The remote store refused the request (validation, constraint, ...)
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The target record does not exist remotely
    #[error("remote record not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Whether retrying later may succeed without changing the request.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Offline | Self::Network(_) | Self::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_remote_errors() {
        assert!(RemoteError::Offline.is_transient());
        assert!(RemoteError::Network("timeout".to_string()).is_transient());
        assert!(RemoteError::Unauthenticated.is_transient());
        assert!(!RemoteError::Rejected("bad title".to_string()).is_transient());
        assert!(!RemoteError::NotFound("a".to_string()).is_transient());
    }

    #[test]
    fn remote_error_converts_into_error() {
        let error: Error = RemoteError::Unauthenticated.into();
        assert_eq!(error.to_string(), "Remote error: not authenticated");
    }
}
