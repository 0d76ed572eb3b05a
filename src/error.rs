//! Error types for the direct-I/O block cache

use thiserror::Error;

use crate::cache::SessionId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the block cache
///
/// A short transfer at end of file is not an error: `read` simply returns
/// fewer bytes than requested.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file could not be opened, or the page-cache bypass was rejected
    #[error("Backing store unavailable for {path}: {reason}")]
    BackingStoreUnavailable { path: String, reason: String },

    /// A slot buffer could not be allocated
    #[error("Block buffer allocation failed for size {size}: {reason}")]
    AllocationFailure { size: usize, reason: String },

    /// A new session id collides with state still held in the cache
    #[error("Session identifier {0} is still referenced by the cache")]
    SessionIdentifierReuse(SessionId),

    /// Operation on a closed or never-opened session
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    /// Seek resolved to an offset outside `0..=u64::MAX`
    #[error("Invalid seek on session {session}: {reason}")]
    InvalidSeek { session: SessionId, reason: String },

    /// A write would extend the file past the largest representable offset
    #[error("Write of {len} bytes at offset {offset} on session {session} overflows the file offset")]
    OffsetOverflow {
        session: SessionId,
        offset: u64,
        len: usize,
    },

    /// Faulting a block in from the backing store failed
    #[error("Failed to load block {block} of session {session}: {source}")]
    LoadFailed {
        session: SessionId,
        block: u64,
        #[source]
        source: std::io::Error,
    },

    /// Writing a dirty block back to the backing store failed
    #[error("Failed to flush block {block} of session {session}: {source}")]
    FlushFailed {
        session: SessionId,
        block: u64,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal bookkeeping error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;

        match err {
            Error::Io(e) => e,
            Error::LoadFailed { source, .. } | Error::FlushFailed { source, .. } => source,
            Error::UnknownSession(_) => std::io::Error::new(ErrorKind::NotFound, err),
            Error::InvalidSeek { .. } | Error::OffsetOverflow { .. } | Error::Config(_) => {
                std::io::Error::new(ErrorKind::InvalidInput, err)
            }
            Error::AllocationFailure { .. } => std::io::Error::new(ErrorKind::OutOfMemory, err),
            other => std::io::Error::other(other),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownSession(SessionId::from_raw(7));
        assert_eq!(err.to_string(), "Unknown session: session-7");

        let err = Error::AllocationFailure {
            size: 16384,
            reason: "out of memory".into(),
        };
        assert!(err.to_string().contains("16384"));
    }

    #[test]
    fn test_flush_failure_keeps_source() {
        let err = Error::FlushFailed {
            session: SessionId::from_raw(1),
            block: 3,
            source: std::io::Error::new(std::io::ErrorKind::WriteZero, "disk full"),
        };
        let io: std::io::Error = err.into();
        assert_eq!(io.kind(), std::io::ErrorKind::WriteZero);
    }

    #[test]
    fn test_io_error_kind_mapping() {
        let io: std::io::Error = Error::UnknownSession(SessionId::from_raw(2)).into();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);

        let io: std::io::Error = Error::InvalidSeek {
            session: SessionId::from_raw(2),
            reason: "negative".into(),
        }
        .into();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidInput);
    }
}
