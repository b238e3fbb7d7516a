//! Error types for calbus.

use thiserror::Error;

/// Result type alias using calbus's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for calbus operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data changed between read and write (optimistic concurrency)
    #[error("Stale state: {0}")]
    StaleState(String),

    /// Publishing to one or more channels failed
    #[error("Publish error on {channel}: {message}")]
    Publish { channel: String, message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is an optimistic-concurrency conflict.
    ///
    /// Stale state is always retryable from scratch.
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleState(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("/cal/mike".to_string());
        assert_eq!(err.to_string(), "Not found: /cal/mike");
    }

    #[test]
    fn test_error_display_stale_state() {
        let err = Error::StaleState("notification version moved".to_string());
        assert_eq!(err.to_string(), "Stale state: notification version moved");
    }

    #[test]
    fn test_error_display_publish() {
        let err = Error::Publish {
            channel: "syslog".to_string(),
            message: "closed".to_string(),
        };
        assert_eq!(err.to_string(), "Publish error on syslog: closed");
    }

    #[test]
    fn test_is_stale() {
        assert!(Error::StaleState("x".into()).is_stale());
        assert!(!Error::Internal("x".into()).is_stale());
        assert!(!Error::NotFound("x".into()).is_stale());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }
}
