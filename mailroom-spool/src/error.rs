//! Error types for spool operations

use std::io;

use thiserror::Error;

use crate::SpooledMailId;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Mail not found: {0}")]
    NotFound(SpooledMailId),

    #[error("Spool validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Spool capacity exceeded: {len}/{capacity} mails")]
    CapacityExceeded { len: usize, capacity: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpoolError {
    /// Whether retrying the same operation later could succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::CapacityExceeded { .. })
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Corrupted mail data: {0}")]
    Corrupted(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Spool path cannot contain '..' components: {0}")]
    ParentDirectory(String),

    #[error("Spool path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Spool path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },

    #[error("Spool path is not a directory: {0}")]
    NotDirectory(String),
}

pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<bincode::error::EncodeError> for SpoolError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for SpoolError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let spool_err = SpoolError::from(io_err);

        assert!(matches!(spool_err, SpoolError::Io(_)));
        assert!(spool_err.is_transient());
        assert!(spool_err.to_string().contains("access denied"));
    }

    #[test]
    fn test_classification() {
        let missing = SpoolError::NotFound(SpooledMailId::generate());
        assert!(missing.is_not_found());
        assert!(!missing.is_transient());

        let full = SpoolError::CapacityExceeded { len: 2, capacity: 2 };
        assert!(full.is_transient());
        assert_eq!(full.to_string(), "Spool capacity exceeded: 2/2 mails");
    }
}
