//! External collaborators the transfer core is built against but does not
//! own: the data channel, the file storage sink, the persisted-progress
//! table, and the clock. All four are explicit, injected traits — no
//! singletons, no module-init side effects.

use async_trait::async_trait;

use crate::error::Result;
use crate::framing::WireMessage;
use crate::model::{PersistedTransfer, StoredFile, TransferId, TransferState};

/// A bidirectional, ordered, reliable, datagram-preserving message channel
/// to a single remote peer (e.g. a WebRTC data channel).
///
/// Inbound delivery is not modeled as a callback registered on the trait;
/// instead the embedder forwards whatever its transport delivers into
/// [`crate::service::TransferService::handle_incoming`], which plays the
/// role of `on_message`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Enqueue a single message. Returns once the message is queued, not
    /// once it is on the wire.
    async fn send(&self, msg: WireMessage) -> Result<()>;

    /// Bytes currently queued but not yet flushed to the wire.
    fn buffered_amount(&self) -> u64;
}

/// The sink a completed receive is handed to.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist `bytes` under `filename` for `transfer_id`. Idempotent: a
    /// second call with the same `transfer_id` MUST return the same
    /// `StoredFile` without duplicating storage.
    async fn save(&self, bytes: Vec<u8>, filename: &str, transfer_id: TransferId) -> Result<StoredFile>;
}

/// The persisted state table backing resume and transfer listing.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Create or overwrite the row for a transfer.
    async fn save_transfer_state(&self, row: PersistedTransfer) -> Result<()>;

    /// Update the mutable fields of an existing row.
    async fn update_progress(
        &self,
        transfer_id: TransferId,
        bytes_transferred: u64,
        state: TransferState,
    ) -> Result<()>;

    /// Fetch a single row.
    async fn get(&self, transfer_id: TransferId) -> Result<Option<PersistedTransfer>>;

    /// All rows for a peer not yet in a terminal `Complete`/`Cancelled` state.
    async fn pending_for_peer(&self, peer_id: u64) -> Result<Vec<PersistedTransfer>>;

    /// Remove a row permanently.
    async fn delete(&self, transfer_id: TransferId) -> Result<()>;
}

/// Injected monotonic-ish wall clock, so speed/ETA calculations are
/// deterministic in tests.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary but fixed epoch for this clock.
    fn now_millis(&self) -> i64;
}

/// Production [`Clock`] backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
