//! Error types for OpalDB.

use crate::page::{FrameId, PageId};
use thiserror::Error;

/// Result type alias using OpalError.
pub type Result<T> = std::result::Result<T, OpalError>;

/// Errors that can occur in OpalDB operations.
///
/// Recoverable conditions (duplicate key, key not found, pinned page,
/// frame exhaustion) also have boolean/option surfaces at the call sites
/// that want them; these variants exist for the paths that propagate.
#[derive(Debug, Error)]
pub enum OpalError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O failure on {page_id}: {reason}")]
    PageIo { page_id: PageId, reason: String },

    // Buffer pool errors
    #[error("invalid frame id {frame_id}, pool holds {capacity} frames")]
    InvalidFrame { frame_id: FrameId, capacity: usize },

    #[error("invalid page id {0}")]
    InvalidPage(PageId),

    #[error("buffer pool full, unable to allocate a frame")]
    BufferPoolFull,

    #[error("{0} is pinned")]
    PagePinned(PageId),

    #[error("{0} is not evictable")]
    FrameNotEvictable(FrameId),

    // Index errors
    #[error("duplicate key")]
    DuplicateKey,

    #[error("key not found")]
    KeyNotFound,

    // Tuple / page layout errors
    #[error("tuple too large: {size} bytes, page holds {max}")]
    TupleTooLarge { size: usize, max: usize },

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    // Execution errors
    #[error("execution error: {0}")]
    Execution(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: OpalError = io_err.into();
        assert!(matches!(err, OpalError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_buffer_errors_display() {
        let err = OpalError::BufferPoolFull;
        assert_eq!(
            err.to_string(),
            "buffer pool full, unable to allocate a frame"
        );

        let err = OpalError::InvalidFrame {
            frame_id: FrameId(42),
            capacity: 10,
        };
        assert_eq!(
            err.to_string(),
            "invalid frame id frame:42, pool holds 10 frames"
        );

        let err = OpalError::PagePinned(PageId(7));
        assert_eq!(err.to_string(), "page:7 is pinned");
    }

    #[test]
    fn test_index_errors_display() {
        assert_eq!(OpalError::DuplicateKey.to_string(), "duplicate key");
        assert_eq!(OpalError::KeyNotFound.to_string(), "key not found");
    }

    #[test]
    fn test_tuple_too_large_display() {
        let err = OpalError::TupleTooLarge {
            size: 5000,
            max: 4072,
        };
        assert_eq!(
            err.to_string(),
            "tuple too large: 5000 bytes, page holds 4072"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OpalError>();
    }
}
