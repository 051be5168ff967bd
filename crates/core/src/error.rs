//! Error types for index operations.
//!
//! Every fallible operation in the crate returns [`Result`]. Argument and shape checks run
//! before any mutation, so an `Err` never leaves an index partially modified.

use std::io;
use thiserror::Error;

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Primary error type for vecindex.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Wrong shape, arity or value of an argument.
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The backend needs `train` before it can be populated or searched.
    #[error("index is not trained")]
    NotTrained,

    #[error("invalid factory descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    /// The backend does not implement this capability.
    #[error("{operation} is not supported by {index} indexes")]
    Unsupported {
        index: &'static str,
        operation: &'static str,
    },

    /// Missing file, or a label that is not stored.
    #[error("not found: {0}")]
    NotFound(String),

    /// Misaligned or out-of-bounds byte range on code access.
    #[error("invalid byte range {start}..{end}: {reason}")]
    Range {
        start: usize,
        end: usize,
        reason: String,
    },

    #[error("index has been disposed")]
    Disposed,

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

/// Machine-checkable classification of an [`IndexError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    DimensionMismatch,
    NotTrained,
    InvalidDescriptor,
    Unsupported,
    NotFound,
    Range,
    Disposed,
    Io,
}

impl IndexError {
    pub fn argument(message: impl Into<String>) -> Self {
        IndexError::Argument(message.into())
    }

    pub fn unsupported(index: &'static str, operation: &'static str) -> Self {
        IndexError::Unsupported { index, operation }
    }

    pub fn range(start: usize, end: usize, reason: impl Into<String>) -> Self {
        IndexError::Range {
            start,
            end,
            reason: reason.into(),
        }
    }

    /// Structurally invalid serialized data.
    pub fn corrupt(message: impl Into<String>) -> Self {
        IndexError::Io(io::Error::new(io::ErrorKind::InvalidData, message.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexError::Argument(_) => ErrorKind::Argument,
            IndexError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            IndexError::NotTrained => ErrorKind::NotTrained,
            IndexError::InvalidDescriptor { .. } => ErrorKind::InvalidDescriptor,
            IndexError::Unsupported { .. } => ErrorKind::Unsupported,
            IndexError::NotFound(_) => ErrorKind::NotFound,
            IndexError::Range { .. } => ErrorKind::Range,
            IndexError::Disposed => ErrorKind::Disposed,
            IndexError::Io(_) => ErrorKind::Io,
        }
    }

    /// Stable error code for logs and language bindings.
    pub fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Argument => "ARGUMENT_ERROR",
            ErrorKind::DimensionMismatch => "DIMENSION_MISMATCH",
            ErrorKind::NotTrained => "NOT_TRAINED",
            ErrorKind::InvalidDescriptor => "INVALID_DESCRIPTOR",
            ErrorKind::Unsupported => "UNSUPPORTED_OPERATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Range => "RANGE_ERROR",
            ErrorKind::Disposed => "DISPOSED",
            ErrorKind::Io => "IO_ERROR",
        }
    }
}

impl From<io::Error> for IndexError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => IndexError::NotFound(e.to_string()),
            io::ErrorKind::UnexpectedEof => {
                IndexError::corrupt(format!("unexpected end of index data: {e}"))
            }
            _ => IndexError::Io(e),
        }
    }
}

impl From<bincode::Error> for IndexError {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(io) => io.into(),
            other => IndexError::corrupt(other.to_string()),
        }
    }
}
