//! Error types.
//!
//! Absence is not an error in this crate: `stats` returns `None`, listings
//! and reads come back empty, and `remove`/`copy`/`rename` return `false`.
//! The variants below cover everything else.

use std::io;
use thiserror::Error;

/// Files API error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found where one was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Invalid path or path combination.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Path resolves outside the storage root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Access to the storage root was refused.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend has no native implementation of this operation.
    #[error("operation not supported by backend: {0}")]
    Unsupported(&'static str),

    /// A cancellation signal was observed mid-operation.
    #[error("operation aborted")]
    Aborted,

    /// The storage service reported a failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create a Backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true for the cancellation error.
    pub fn is_aborted(&self) -> bool {
        matches!(self, VfsError::Aborted)
    }

    /// Returns true if this is a not-found-class error, including
    /// `io::ErrorKind::NotFound` surfaced by the local filesystem.
    pub fn is_not_found(&self) -> bool {
        match self {
            VfsError::NotFound(_) => true,
            VfsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::PathEscapesRoot(msg) | VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::Unsupported(op) => io::Error::new(io::ErrorKind::Unsupported, op),
            VfsError::Aborted => io::Error::new(io::ErrorKind::Interrupted, "operation aborted"),
            VfsError::Backend(msg) => io::Error::other(msg),
            VfsError::Io(e) => e,
            VfsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// Files API result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(VfsError::not_found("/a").is_not_found());
        assert!(VfsError::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).is_not_found());
        assert!(!VfsError::backend("503 SlowDown").is_not_found());
    }

    #[test]
    fn test_io_conversion() {
        let err: io::Error = VfsError::Aborted.into();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);

        let err: io::Error = VfsError::is_a_directory("/d").into();
        assert_eq!(err.kind(), io::ErrorKind::IsADirectory);
    }
}
