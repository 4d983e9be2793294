//! Hand-written in-memory fakes for the external collaborator traits, used
//! across the sender/receiver/service test suites instead of a mocking
//! framework.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::framing::WireMessage;
use crate::interfaces::{Channel, Clock, FileStore, ProgressStore};
use crate::model::{PersistedTransfer, StoredFile, TransferId, TransferState};

/// An in-memory [`Channel`] backed by a queue of outbound frames and a
/// settable `buffered_amount`.
#[derive(Clone, Default)]
pub struct FakeChannel {
    inner: Arc<Mutex<FakeChannelInner>>,
}

#[derive(Default)]
struct FakeChannelInner {
    sent: VecDeque<WireMessage>,
    buffered: u64,
    fail_next: bool,
}

impl FakeChannel {
    /// A channel that always reports zero buffered bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value the next `buffered_amount()` calls will report.
    pub fn set_buffered_amount(&self, value: u64) {
        self.inner.lock().buffered = value;
    }

    /// Make the next `send` call return a channel error.
    pub fn fail_next_send(&self) {
        self.inner.lock().fail_next = true;
    }

    /// Drain and return every frame sent so far, in order.
    pub fn sent_frames(&self) -> Vec<WireMessage> {
        self.inner.lock().sent.iter().cloned().collect()
    }
}

#[async_trait]
impl Channel for FakeChannel {
    async fn send(&self, msg: WireMessage) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_next {
            inner.fail_next = false;
            return Err(crate::error::Error::Channel("simulated send failure".into()));
        }
        inner.sent.push_back(msg);
        Ok(())
    }

    fn buffered_amount(&self) -> u64 {
        self.inner.lock().buffered
    }
}

/// An in-memory [`FileStore`] backed by a map, keyed by transfer id.
#[derive(Clone, Default)]
pub struct FakeFileStore {
    inner: Arc<Mutex<HashMap<TransferId, (StoredFile, Vec<u8>)>>>,
}

impl FakeFileStore {
    /// A store with nothing saved yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The bytes saved for a transfer, if any.
    pub fn saved_bytes(&self, transfer_id: TransferId) -> Option<Vec<u8>> {
        self.inner.lock().get(&transfer_id).map(|(_, b)| b.clone())
    }

    /// How many times `save` has actually written a new entry.
    pub fn save_count(&self) -> usize {
        self.inner.lock().len()
    }
}

#[async_trait]
impl FileStore for FakeFileStore {
    async fn save(&self, bytes: Vec<u8>, filename: &str, transfer_id: TransferId) -> Result<StoredFile> {
        let mut inner = self.inner.lock();
        if let Some((existing, _)) = inner.get(&transfer_id) {
            return Ok(existing.clone());
        }
        let stored = StoredFile {
            id: format!("stored-{transfer_id}"),
            filename: filename.to_string(),
            size: bytes.len() as u64,
            transfer_id,
        };
        inner.insert(transfer_id, (stored.clone(), bytes));
        Ok(stored)
    }
}

/// An in-memory [`ProgressStore`] backed by a map behind a mutex.
#[derive(Clone, Default)]
pub struct FakeProgressStore {
    inner: Arc<Mutex<HashMap<TransferId, PersistedTransfer>>>,
}

impl FakeProgressStore {
    /// A store with no rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored.
    pub fn row_count(&self) -> usize {
        self.inner.lock().len()
    }
}

#[async_trait]
impl ProgressStore for FakeProgressStore {
    async fn save_transfer_state(&self, row: PersistedTransfer) -> Result<()> {
        self.inner.lock().insert(row.transfer_id, row);
        Ok(())
    }

    async fn update_progress(
        &self,
        transfer_id: TransferId,
        bytes_transferred: u64,
        state: TransferState,
    ) -> Result<()> {
        if let Some(row) = self.inner.lock().get_mut(&transfer_id) {
            row.bytes_transferred = bytes_transferred;
            row.state = state;
        }
        Ok(())
    }

    async fn get(&self, transfer_id: TransferId) -> Result<Option<PersistedTransfer>> {
        Ok(self.inner.lock().get(&transfer_id).cloned())
    }

    async fn pending_for_peer(&self, peer_id: u64) -> Result<Vec<PersistedTransfer>> {
        Ok(self
            .inner
            .lock()
            .values()
            .filter(|row| {
                row.peer_id == peer_id
                    && !matches!(row.state, TransferState::Complete | TransferState::Cancelled)
            })
            .cloned()
            .collect())
    }

    async fn delete(&self, transfer_id: TransferId) -> Result<()> {
        self.inner.lock().remove(&transfer_id);
        Ok(())
    }
}

/// A manually-advanceable [`Clock`] for deterministic speed/ETA tests.
#[derive(Default)]
pub struct FakeClock {
    millis: AtomicI64,
}

impl FakeClock {
    /// A clock starting at a fixed, non-zero instant.
    pub fn new() -> Self {
        Self {
            millis: AtomicI64::new(1_700_000_000_000),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Monotonically increasing fake peer id generator, handy when a test needs
/// several distinct peers without caring about their numeric values.
#[derive(Default)]
pub struct FakePeerIds {
    next: AtomicU64,
}

impl FakePeerIds {
    /// A generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// The next unused id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}
