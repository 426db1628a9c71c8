//! Error types for workspace-confined file operations.
//!
//! Every message names the caller's relative path only. The fully resolved
//! target of a traversal attempt is kept on the error for diagnostics but is
//! never part of its `Display` output.

use crate::policy::Operation;
use std::path::PathBuf;

/// Result type for confined file operations.
pub type Result<T> = std::result::Result<T, SafeFsError>;

/// Errors that can occur during confined file operations.
#[derive(Debug, thiserror::Error)]
pub enum SafeFsError {
    /// The requested path resolves outside the workspace root
    #[error("Path escapes workspace root: {requested:?}")]
    PathTraversal {
        requested: String,
        /// Resolved target, for diagnostics only.
        resolved: PathBuf,
    },

    /// A mutating operation was attempted under a readonly policy
    #[error("Operation '{operation}' blocked by readonly policy: {path:?}")]
    PathPolicy { operation: Operation, path: String },

    /// Required target is absent or has the wrong type
    #[error("Not found: {path:?}")]
    NotFound { path: String },

    /// Destination already exists
    #[error("Already exists: {path:?}")]
    Conflict { path: String },

    /// Requested path is malformed
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// I/O operation failed
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Fieldless discriminant of [`SafeFsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Traversal,
    Policy,
    NotFound,
    Conflict,
    InvalidPath,
    Io,
    Configuration,
}

impl ErrorKind {
    /// Process exit code for command-line hosts.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Io => 1,
            Self::Configuration => 2,
            Self::Traversal => 3,
            Self::Policy => 4,
            Self::NotFound => 5,
            Self::Conflict => 6,
            Self::InvalidPath => 7,
        }
    }
}

impl SafeFsError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PathTraversal { .. } => ErrorKind::Traversal,
            Self::PathPolicy { .. } => ErrorKind::Policy,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidPath { .. } => ErrorKind::InvalidPath,
            Self::Io { .. } => ErrorKind::Io,
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Maps `NotFound` I/O errors onto [`SafeFsError::NotFound`], everything else onto `Io`.
    pub(crate) fn from_io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_display_omits_resolved_target() {
        let err = SafeFsError::PathTraversal {
            requested: "../secret".to_string(),
            resolved: PathBuf::from("/home/someone/secret"),
        };
        let message = err.to_string();
        assert!(message.contains("../secret"));
        assert!(!message.contains("/home/someone"));
        assert_eq!(err.kind(), ErrorKind::Traversal);
    }

    #[test]
    fn exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::Traversal,
            ErrorKind::Policy,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::InvalidPath,
            ErrorKind::Io,
            ErrorKind::Configuration,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn from_io_splits_not_found() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(SafeFsError::from_io("a", missing).kind(), ErrorKind::NotFound);

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(SafeFsError::from_io("a", denied).kind(), ErrorKind::Io);
    }
}
