//! Crate-wide error type.

use std::path::Path;

/// Errors produced by the session layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A credential field required for the operation is absent.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// The identity backend rejected or could not serve a token refresh.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The identity backend rejected the login.
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// A logical request exhausted its 401 -> refresh -> retry budget.
    #[error("Authentication retry limit exceeded after {attempts} attempts")]
    RetryLimitExceeded { attempts: u32 },

    /// The request was already replayed once after a refresh.
    #[error("Request was already retried after a token refresh")]
    AlreadyRetried,

    /// The request body is a stream and cannot be sent a second time.
    #[error("Request body cannot be replayed")]
    NotReplayable,

    /// Non-success HTTP status from the backend.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// A path could not be joined onto the configured base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage file could not be read or written.
    #[error("Storage I/O error at {path}: {message}")]
    StorageIo { path: String, message: String },

    /// Stored credential could not be (de)serialized.
    #[error("Storage serialization error: {0}")]
    StorageSerialization(String),

    /// Any other storage backend failure (e.g. keyring).
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn storage_io(path: &Path, message: impl Into<String>) -> Self {
        Self::StorageIo {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// Classify a transport error, separating timeouts from other failures.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err)
        }
    }

    /// Whether this error came from the transport rather than the backend.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::Api {
            status: 401,
            message: "Security violation detected".into(),
        };
        assert_eq!(err.to_string(), "API error (401): Security violation detected");

        let err = Error::RetryLimitExceeded { attempts: 3 };
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_storage_io_includes_path() {
        let err = Error::storage_io(Path::new("/tmp/creds.json"), "denied");
        assert_eq!(
            err.to_string(),
            "Storage I/O error at /tmp/creds.json: denied"
        );
    }

    #[test]
    fn test_is_network() {
        assert!(Error::Timeout.is_network());
        assert!(!Error::RefreshFailed("x".into()).is_network());
    }
}
