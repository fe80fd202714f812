//! Common error types for exfig.

use thiserror::Error;

/// Top-level error type for exfig sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote design source request failed.
    #[error("Remote error: {0}")]
    Remote(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether this error came from the remote collaborator.
    ///
    /// Remote failures are the only class that aborts a sync run; everything
    /// else is absorbed by the cache and checkpoint layers.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_classification() {
        assert!(Error::Remote("boom".to_string()).is_remote());
        assert!(!Error::Serialization("bad".to_string()).is_remote());
        assert!(!Error::NotFound("x".to_string()).is_remote());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
