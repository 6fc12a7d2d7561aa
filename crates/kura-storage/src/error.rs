//! Storage error types.

use std::io;
use thiserror::Error;

use crate::client::ClientError;

/// Storage error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Invalid or missing engine settings, unreachable host, bad credentials.
    ///
    /// Only ever raised while building an engine.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The addressed entry or directory does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend session, authentication or lock failure mid-operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// Path escapes the engine root or is otherwise unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Archive encoding or decoding error.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// The three classes of failure a caller has to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal, surfaced while constructing an engine.
    Configuration,
    /// Routine control flow: the addressed entry is absent.
    NotFound,
    /// Fatal for the call that raised it.
    Storage,
}

impl StorageError {
    /// Create a Configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a Backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Configuration(_) => ErrorKind::Configuration,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Backend(_)
            | StorageError::InvalidPath(_)
            | StorageError::Io(_)
            | StorageError::Archive(_) => ErrorKind::Storage,
        }
    }

    /// Returns true if this is a NotFound error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true if this is a Configuration error.
    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

impl From<ClientError> for StorageError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NoSuchKey(key) => StorageError::NotFound(key),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Convert StorageError to std::io::Error for compatibility.
impl From<StorageError> for io::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            StorageError::Configuration(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            StorageError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            StorageError::Backend(msg) => io::Error::other(msg),
            StorageError::Io(e) => e,
            StorageError::Archive(e) => io::Error::other(e),
        }
    }
}

/// Storage result type.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_taxonomy() {
        assert_eq!(
            StorageError::configuration("no root").kind(),
            ErrorKind::Configuration
        );
        assert!(StorageError::not_found("a.txt").is_not_found());
        assert_eq!(StorageError::backend("lock").kind(), ErrorKind::Storage);
        assert_eq!(
            StorageError::from(io::Error::other("boom")).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_client_error_conversion() {
        let missing: StorageError = ClientError::NoSuchKey("docs/a.txt".into()).into();
        assert!(missing.is_not_found());

        let transport: StorageError = ClientError::Transport("reset".into()).into();
        assert_eq!(transport.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_into_io_error() {
        let e: io::Error = StorageError::not_found("x").into();
        assert_eq!(e.kind(), io::ErrorKind::NotFound);
    }
}
