//! # Error Handling
//!
//! A single error type covering every way a transfer can fail, grouped by
//! the taxonomy in the transfer protocol's error-handling design: protocol
//! violations, integrity failures, I/O, channel failures, capacity limits,
//! cancellation, and storage rejections.
//!
//! Every terminal transition of a [`crate::sender::Sender`] or
//! [`crate::receiver::Receiver`] carries one of these variants, and the
//! service surfaces it to callers through `on_transfer_error` rather than
//! ever propagating a panic.

use thiserror::Error;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the chunked transfer core.
#[derive(Error, Debug)]
pub enum Error {
    // ------------------------------------------------------------------
    // Protocol errors: malformed frames, metadata violations
    // ------------------------------------------------------------------
    /// A frame could not be parsed or demultiplexed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A metadata frame was rejected (bad filename, bad hash, duplicate).
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    // ------------------------------------------------------------------
    // Integrity errors: hash or size mismatch at EOF
    // ------------------------------------------------------------------
    /// The receiver's running hash did not match the declared metadata hash.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Hash declared in the Metadata frame.
        expected: String,
        /// Hash computed by the receiver over received bytes.
        actual: String,
    },

    /// Fewer or more bytes were received than the metadata declared.
    #[error("size mismatch: expected {expected} bytes, received {actual} bytes")]
    SizeMismatch {
        /// Size declared in the Metadata frame.
        expected: u64,
        /// Bytes actually received before EOF.
        actual: u64,
    },

    // ------------------------------------------------------------------
    // I/O errors
    // ------------------------------------------------------------------
    /// A filesystem operation failed (read, write, temp file creation).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ------------------------------------------------------------------
    // Channel errors
    // ------------------------------------------------------------------
    /// The data channel rejected a send or closed mid-transfer.
    #[error("channel error: {0}")]
    Channel(String),

    // ------------------------------------------------------------------
    // Capacity errors
    // ------------------------------------------------------------------
    /// The per-peer concurrency cap was already reached.
    #[error("too many concurrent transfers for this peer (limit {limit})")]
    TooManyConcurrent {
        /// The configured `max_concurrent_per_contact` limit.
        limit: usize,
    },

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------
    /// The transfer was cooperatively cancelled.
    #[error("transfer cancelled")]
    Cancelled,

    // ------------------------------------------------------------------
    // Storage errors
    // ------------------------------------------------------------------
    /// The `FileStore` rejected the completed file.
    #[error("storage error: {0}")]
    Storage(String),

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------
    /// A metadata frame was not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Coarse-grained kind used for logging and for callers that want to
    /// branch without matching every variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Protocol(_) | Error::InvalidMetadata(_) => ErrorKind::Protocol,
            Error::HashMismatch { .. } | Error::SizeMismatch { .. } => ErrorKind::Integrity,
            Error::Io(_) => ErrorKind::Io,
            Error::Channel(_) => ErrorKind::Channel,
            Error::TooManyConcurrent { .. } => ErrorKind::Capacity,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Json(_) => ErrorKind::Protocol,
        }
    }
}

/// Coarse error category, matching the taxonomy kinds (not concrete types).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed frame, metadata violation, duplicate metadata, unknown frame.
    Protocol,
    /// Hash mismatch or size mismatch at EOF.
    Integrity,
    /// File read/write/permission error, temp file creation failure.
    Io,
    /// Send failure, channel closed mid-transfer.
    Channel,
    /// Concurrency cap exceeded.
    Capacity,
    /// Cooperative cancellation.
    Cancelled,
    /// `FileStore` rejection.
    Storage,
}
