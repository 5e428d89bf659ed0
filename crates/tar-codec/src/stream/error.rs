//! Error types for the stream decoder and encoder.

use thiserror::Error;

use crate::HeaderError;

/// Errors that can occur while decoding or encoding a tar stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// I/O error from the byte source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A header block or extension payload could not be decoded or encoded.
    #[error("header error: {0}")]
    Header(#[from] HeaderError),

    /// The source ended in the middle of a block, payload or body.
    #[error("unexpected end of data: wanted {expected} bytes, got {actual}")]
    UnderRead {
        /// Number of bytes requested.
        expected: u64,
        /// Number of bytes available before the source ended.
        actual: u64,
    },

    /// A body passed to the encoder does not match the declared size.
    #[error("body size mismatch: header declares {expected} bytes, body has {actual}")]
    BodySizeMismatch {
        /// Size declared in the header.
        expected: u64,
        /// Bytes read from the body, stopping one past the declared size.
        actual: u64,
    },

    /// Extension records at the end of the archive with no entry to apply to.
    #[error("extension records without a following entry")]
    OrphanedMetadata,

    /// The decoder already failed and reads no further.
    #[error("decoder stopped after an earlier error")]
    Stopped,

    /// A resolved path or link target exceeds the configured maximum length.
    #[error("path exceeds limit: {len} bytes > {limit} bytes")]
    PathTooLong {
        /// Actual path length.
        len: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A PAX record payload exceeds the configured maximum size.
    #[error("PAX header exceeds limit: {size} bytes > {limit} bytes")]
    PaxTooLarge {
        /// Declared payload size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// A GNU long name/link payload exceeds the configured maximum size.
    #[error("GNU long name/link exceeds limit: {size} bytes > {limit} bytes")]
    GnuLongTooLarge {
        /// Declared payload size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// Too many extension records in a row.
    #[error("too many pending extension records: {count} > {limit}")]
    TooManyPendingEntries {
        /// Number of extension records seen.
        count: usize,
        /// Configured limit.
        limit: usize,
    },
}

impl From<StreamError> for std::io::Error {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Io(e) => e,
            e @ StreamError::UnderRead { .. } => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e)
            }
            e => std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        }
    }
}

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;
