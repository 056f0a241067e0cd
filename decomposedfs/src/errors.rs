use std::io;

use thiserror::Error;
use tokio::task::JoinError;

/// Errors returned by the storage engine.
///
/// I/O failures of the underlying filesystem or blobstore are passed through
/// unchanged in [Error::Io], the engine never retries them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("locked: {0}")]
    Locked(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The node exists on disk, but required attributes are missing or unreadable.
    #[error("corrupt node {node}: {reason}")]
    Corrupt { node: String, reason: String },

    #[error("insufficient storage: {0}")]
    InsufficientStorage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("internal storage error: {0}")]
    StorageError(String),
}

impl Error {
    /// True for [Error::NotFound] and for I/O errors of kind [io::ErrorKind::NotFound].
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub(crate) fn corrupt(node: impl ToString, reason: impl ToString) -> Self {
        Error::Corrupt {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<JoinError> for Error {
    fn from(value: JoinError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<crate::ids::Error> for Error {
    fn from(value: crate::ids::Error) -> Self {
        Error::InvalidRequest(value.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(e) => e,
            Error::NotFound(msg) => Self::new(io::ErrorKind::NotFound, msg),
            Error::AlreadyExists(msg) => Self::new(io::ErrorKind::AlreadyExists, msg),
            Error::PermissionDenied(msg) => Self::new(io::ErrorKind::PermissionDenied, msg),
            Error::InvalidRequest(msg) => Self::new(io::ErrorKind::InvalidInput, msg),
            Error::NotSupported(msg) => Self::new(io::ErrorKind::Unsupported, msg),
            Error::Cancelled => Self::new(io::ErrorKind::Interrupted, "operation cancelled"),
            e @ Error::Corrupt { .. } => Self::new(io::ErrorKind::InvalidData, e.to_string()),
            e => Self::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}
