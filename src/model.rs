//! Core data types shared by the sender, receiver, and service: transfer
//! identity, direction, state machine, wire metadata, and progress/
//! persistence records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally-unique identifier for one transfer.
///
/// Backed by a random (v4) UUID, which satisfies the 128-bit-random
/// requirement; rendered in its canonical hyphenated lowercase form
/// wherever a textual form is needed (wire, persistence, logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Mint a fresh, random transfer id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which end of the transfer this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// This process is streaming the file out.
    Send,
    /// This process is reassembling the file from inbound chunks.
    Receive,
}

/// Lifecycle state of a transfer (sender or receiver side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Created but not yet streaming.
    Pending,
    /// Actively sending or receiving chunks.
    Active,
    /// Suspended; not currently consuming chunks (reserved for future use).
    Paused,
    /// Finished successfully; file handed to the store (receiver) or fully
    /// streamed (sender).
    Complete,
    /// Cooperatively cancelled.
    Cancelled,
    /// Terminated by an unrecoverable error.
    Failed,
}

impl TransferState {
    /// Whether this state is one of the three terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Complete | TransferState::Cancelled | TransferState::Failed
        )
    }

    /// Whether the transfer is actively streaming chunks.
    pub fn is_active(&self) -> bool {
        matches!(self, TransferState::Active)
    }
}

/// Wire-format file metadata, carried by the Metadata frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    /// The transfer this metadata belongs to.
    pub transfer_id: TransferId,
    /// Basename only; no path separators or parent-directory tokens.
    pub filename: String,
    /// Total size of the file in bytes.
    pub size_bytes: u64,
    /// Lowercase hex-encoded SHA-256 of the entire file.
    pub hash_hex: String,
    /// Best-effort MIME type, supplied by the sender.
    pub mime_type: String,
}

/// A point-in-time progress snapshot for a single transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    /// The transfer this snapshot describes.
    pub transfer_id: TransferId,
    /// Bytes sent or received so far.
    pub bytes_transferred: u64,
    /// Total size of the file, from the metadata.
    pub total_bytes: u64,
    /// Current lifecycle state.
    pub state: TransferState,
    /// Moving estimate of throughput, in bytes per second.
    pub speed_bps: f64,
    /// Estimated seconds remaining, or 0 when speed is 0 or the transfer is
    /// terminal.
    pub eta_seconds: f64,
}

impl TransferProgress {
    /// Compute `eta_seconds` from the remaining bytes and current speed.
    pub fn with_eta(mut self) -> Self {
        self.eta_seconds = if self.speed_bps > 0.0 {
            (self.total_bytes.saturating_sub(self.bytes_transferred)) as f64 / self.speed_bps
        } else {
            0.0
        };
        self
    }
}

/// A persisted row describing a transfer, owned by a `ProgressStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTransfer {
    /// The transfer this row describes.
    pub transfer_id: TransferId,
    /// The remote peer this transfer is with.
    pub peer_id: u64,
    /// Send or receive, from this process's perspective.
    pub direction: TransferDirection,
    /// Basename of the file.
    pub filename: String,
    /// Declared total size in bytes.
    pub size_bytes: u64,
    /// Declared SHA-256, lowercase hex.
    pub hash_hex: String,
    /// Bytes transferred as of the last update.
    pub bytes_transferred: u64,
    /// Current lifecycle state.
    pub state: TransferState,
    /// Unix timestamp (seconds) the row was created.
    pub created_at: i64,
}

/// The result of a successful `FileStore::save` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    /// Storage-assigned identifier for the saved file.
    pub id: String,
    /// Basename the file was saved under.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// The transfer that produced this file.
    pub transfer_id: TransferId,
}
