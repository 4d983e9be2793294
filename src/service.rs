//! The concurrency core: multiplexes many concurrent sends and receives
//! per peer, demuxes inbound frames to the right receiver, persists
//! progress, and enforces the per-peer concurrency cap.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chunker::file_info;
use crate::error::{Error, Result};
use crate::framing::{demux, InboundFrame, WireMessage};
use crate::interfaces::{Channel, Clock, FileStore, ProgressStore};
use crate::model::{
    FileMetadata, PersistedTransfer, StoredFile, TransferDirection, TransferId, TransferProgress,
    TransferState,
};
use crate::receiver::Receiver;
use crate::sender::{Sender, SenderHandle};

/// Tunables for a [`TransferService`] instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Maximum simultaneous active transfers (either direction counted
    /// separately) per peer before `send_file`/inbound metadata are refused.
    pub max_concurrent_per_contact: usize,
    /// Chunk size senders spawned by this service use. Defaults to the
    /// wire-normative [`crate::framing::CHUNK_SIZE`]; a test harness may
    /// override it to exercise multi-chunk behavior on small fixtures.
    pub chunk_size: usize,
    /// How long `cancel_send`/`cancel_receive` wait for graceful shutdown
    /// before forcing cleanup.
    pub cancel_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_contact: 3,
            chunk_size: crate::framing::CHUNK_SIZE,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Something worth telling the embedder about, produced by
/// [`TransferService::handle_incoming`] or a completed send.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A chunk was sent or received; `bytes_transferred` is current.
    Progress(TransferProgress),
    /// The transfer finished successfully; carries the saved file (receive
    /// side only — a completed send carries no stored file).
    Completed {
        /// The peer this transfer was with.
        peer_id: u64,
        /// The transfer that completed.
        transfer_id: TransferId,
        /// The file as persisted by the `FileStore`, if this was a receive.
        stored: Option<StoredFile>,
    },
    /// The transfer was cancelled.
    Cancelled {
        /// The peer this transfer was with.
        peer_id: u64,
        /// The transfer that was cancelled.
        transfer_id: TransferId,
    },
    /// The transfer failed terminally.
    Failed {
        /// The peer this transfer was with.
        peer_id: u64,
        /// The transfer that failed.
        transfer_id: TransferId,
        /// A human-readable description of the failure.
        message: String,
    },
}

struct SenderEntry {
    handle: SenderHandle,
    task: JoinHandle<()>,
}

/// Owns every active sender and receiver and routes inbound frames between
/// them.
pub struct TransferService<C, F, P, Clk>
where
    C: Channel + 'static,
    F: FileStore + 'static,
    P: ProgressStore + 'static,
    Clk: Clock + 'static,
{
    config: ServiceConfig,
    file_store: Arc<F>,
    progress_store: Arc<P>,
    clock: Arc<Clk>,
    /// Shared with the detached tasks `send_file` spawns, so a terminal
    /// send can remove its own entry instead of leaking it until the next
    /// `cancel_send`.
    senders: Arc<parking_lot::Mutex<HashMap<(u64, TransferId), SenderEntry>>>,
    /// At most one active receiver per peer (see the design notes on the
    /// routing ambiguity this resolves).
    receivers: parking_lot::Mutex<HashMap<u64, Receiver<F>>>,
    receiver_ids: parking_lot::Mutex<HashMap<u64, TransferId>>,
    _channel: std::marker::PhantomData<C>,
}

impl<C, F, P, Clk> TransferService<C, F, P, Clk>
where
    C: Channel + 'static,
    F: FileStore + 'static,
    P: ProgressStore + 'static,
    Clk: Clock + 'static,
{
    /// Build a service around the given collaborators.
    pub fn new(config: ServiceConfig, file_store: Arc<F>, progress_store: Arc<P>, clock: Arc<Clk>) -> Self {
        Self {
            config,
            file_store,
            progress_store,
            clock,
            senders: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            receivers: parking_lot::Mutex::new(HashMap::new()),
            receiver_ids: parking_lot::Mutex::new(HashMap::new()),
            _channel: std::marker::PhantomData,
        }
    }

    fn active_sender_count(&self, peer_id: u64) -> usize {
        self.senders.lock().keys().filter(|(p, _)| *p == peer_id).count()
    }

    /// Begin streaming `file_path` to `peer_id` over `channel`.
    ///
    /// `transfer_id` is `None` for a fresh transfer (a random id is minted)
    /// or `Some(existing_id)` to resume a previously interrupted send.
    pub async fn send_file(
        &self,
        peer_id: u64,
        channel: Arc<C>,
        file_path: PathBuf,
        transfer_id: Option<TransferId>,
        resume_offset: u64,
    ) -> Result<TransferId>
    where
        C: Channel,
    {
        if self.active_sender_count(peer_id) >= self.config.max_concurrent_per_contact {
            return Err(Error::TooManyConcurrent {
                limit: self.config.max_concurrent_per_contact,
            });
        }

        let transfer_id = transfer_id.unwrap_or_else(TransferId::new);
        let (size_bytes, hash_hex) = file_info(&file_path).await?;
        let filename = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        self.progress_store
            .save_transfer_state(PersistedTransfer {
                transfer_id,
                peer_id,
                direction: TransferDirection::Send,
                filename,
                size_bytes,
                hash_hex,
                bytes_transferred: resume_offset,
                state: TransferState::Pending,
                created_at: self.clock.now_millis() / 1000,
            })
            .await?;

        let (sender, handle) = Sender::with_chunk_size(channel, self.config.chunk_size);
        let progress_store = self.progress_store.clone();
        let clock = self.clock.clone();
        let path = file_path.clone();
        let senders = self.senders.clone();

        let task = tokio::spawn(async move {
            let result = sender
                .send(&path, transfer_id, resume_offset, "application/octet-stream", clock.as_ref(), {
                    let progress_store = progress_store.clone();
                    move |progress: TransferProgress| {
                        let progress_store = progress_store.clone();
                        let bytes = progress.bytes_transferred;
                        tokio::spawn(async move {
                            let _ = progress_store
                                .update_progress(transfer_id, bytes, TransferState::Active)
                                .await;
                        });
                    }
                })
                .await;

            let final_state = match &result {
                Ok(()) => TransferState::Complete,
                Err(Error::Cancelled) => TransferState::Cancelled,
                Err(_) => TransferState::Failed,
            };
            if let Ok(Some(row)) = progress_store.get(transfer_id).await {
                let _ = progress_store
                    .update_progress(transfer_id, row.bytes_transferred, final_state)
                    .await;
            }
            if let Err(e) = result {
                warn!(%transfer_id, error = %e, "send failed");
            } else {
                info!(%transfer_id, "send complete");
            }

            // Remove our own entry on every terminal path so a completed or
            // failed send doesn't count against the concurrency cap forever.
            // `cancel_send` may have already removed it; that's a no-op.
            senders.lock().remove(&(peer_id, transfer_id));
        });

        self.senders.lock().insert((peer_id, transfer_id), SenderEntry { handle, task });
        Ok(transfer_id)
    }

    /// Cooperatively cancel an outbound transfer, waiting up to
    /// `self.config.cancel_grace` for the driving task to notice.
    pub async fn cancel_send(&self, peer_id: u64, transfer_id: TransferId) -> Result<bool> {
        let entry = self.senders.lock().remove(&(peer_id, transfer_id));
        let Some(entry) = entry else {
            return Ok(false);
        };

        entry.handle.cancel();
        if tokio::time::timeout(self.config.cancel_grace, entry.task).await.is_err() {
            warn!(%transfer_id, "cancel_send grace period elapsed; forcing cleanup");
        }

        if let Ok(Some(row)) = self.progress_store.get(transfer_id).await {
            self.progress_store
                .update_progress(transfer_id, row.bytes_transferred, TransferState::Cancelled)
                .await?;
        }
        Ok(true)
    }

    /// Demux and route one inbound message from `peer_id`.
    pub async fn handle_incoming(&self, peer_id: u64, message: WireMessage) -> Result<Option<TransferEvent>> {
        match demux(&message) {
            InboundFrame::Metadata(metadata) => self.handle_inbound_metadata(peer_id, metadata).await,
            InboundFrame::Chunk(bytes) => self.handle_inbound_chunk(peer_id, bytes).await,
            InboundFrame::Eof => self.handle_inbound_eof(peer_id).await,
            InboundFrame::Cancel => self.handle_inbound_cancel(peer_id).await,
            InboundFrame::Ack | InboundFrame::ErrorSentinel => Ok(None),
            InboundFrame::Unknown => {
                warn!(peer_id, "dropped unrecognized frame");
                Ok(None)
            }
        }
    }

    async fn handle_inbound_metadata(&self, peer_id: u64, metadata: FileMetadata) -> Result<Option<TransferEvent>> {
        if self.receiver_ids.lock().contains_key(&peer_id) {
            warn!(peer_id, "dropped inbound metadata: peer already has an active receiver");
            return Ok(None);
        }

        let transfer_id = metadata.transfer_id;
        let mut receiver = Receiver::new(self.file_store.clone());
        if let Err(e) = receiver.on_metadata(metadata.clone()).await {
            warn!(peer_id, %transfer_id, error = %e, "rejected inbound metadata");
            return Ok(Some(TransferEvent::Failed {
                peer_id,
                transfer_id,
                message: e.to_string(),
            }));
        }

        self.progress_store
            .save_transfer_state(PersistedTransfer {
                transfer_id,
                peer_id,
                direction: TransferDirection::Receive,
                filename: metadata.filename,
                size_bytes: metadata.size_bytes,
                hash_hex: metadata.hash_hex,
                bytes_transferred: 0,
                state: TransferState::Active,
                created_at: self.clock.now_millis() / 1000,
            })
            .await?;

        self.receivers.lock().insert(peer_id, receiver);
        self.receiver_ids.lock().insert(peer_id, transfer_id);
        Ok(None)
    }

    async fn handle_inbound_chunk(&self, peer_id: u64, bytes: Vec<u8>) -> Result<Option<TransferEvent>> {
        let Some(&transfer_id) = self.receiver_ids.lock().get(&peer_id) else {
            warn!(peer_id, "dropped chunk: no active receiver for this peer");
            return Ok(None);
        };

        let mut receiver = match self.receivers.lock().remove(&peer_id) {
            Some(r) => r,
            None => return Ok(None),
        };

        match receiver.on_chunk(bytes).await {
            Ok(()) => {
                let bytes_transferred = receiver.resume_offset();
                self.receivers.lock().insert(peer_id, receiver);
                self.progress_store
                    .update_progress(transfer_id, bytes_transferred, TransferState::Active)
                    .await?;
                let total_bytes = self
                    .progress_store
                    .get(transfer_id)
                    .await?
                    .map(|row| row.size_bytes)
                    .unwrap_or(0);
                Ok(Some(TransferEvent::Progress(
                    TransferProgress {
                        transfer_id,
                        bytes_transferred,
                        total_bytes,
                        state: TransferState::Active,
                        speed_bps: 0.0,
                        eta_seconds: 0.0,
                    }
                    .with_eta(),
                )))
            }
            Err(e) => {
                self.receiver_ids.lock().remove(&peer_id);
                if let Ok(Some(row)) = self.progress_store.get(transfer_id).await {
                    self.progress_store
                        .update_progress(transfer_id, row.bytes_transferred, TransferState::Failed)
                        .await?;
                }
                warn!(peer_id, %transfer_id, error = %e, "receiver failed");
                Ok(Some(TransferEvent::Failed {
                    peer_id,
                    transfer_id,
                    message: e.to_string(),
                }))
            }
        }
    }

    async fn handle_inbound_eof(&self, peer_id: u64) -> Result<Option<TransferEvent>> {
        let Some(transfer_id) = self.receiver_ids.lock().remove(&peer_id) else {
            return Ok(None);
        };
        let receiver = self.receivers.lock().remove(&peer_id);
        let Some(mut receiver) = receiver else {
            return Ok(None);
        };

        match receiver.on_eof().await {
            Ok(stored) => {
                self.progress_store
                    .update_progress(transfer_id, stored.size, TransferState::Complete)
                    .await?;
                Ok(Some(TransferEvent::Completed {
                    peer_id,
                    transfer_id,
                    stored: Some(stored),
                }))
            }
            Err(e) => {
                if let Ok(Some(row)) = self.progress_store.get(transfer_id).await {
                    self.progress_store
                        .update_progress(transfer_id, row.bytes_transferred, TransferState::Failed)
                        .await?;
                }
                Ok(Some(TransferEvent::Failed {
                    peer_id,
                    transfer_id,
                    message: e.to_string(),
                }))
            }
        }
    }

    async fn handle_inbound_cancel(&self, peer_id: u64) -> Result<Option<TransferEvent>> {
        let Some(transfer_id) = self.receiver_ids.lock().remove(&peer_id) else {
            return Ok(None);
        };
        if let Some(mut receiver) = self.receivers.lock().remove(&peer_id) {
            receiver.on_cancel();
        }
        if let Ok(Some(row)) = self.progress_store.get(transfer_id).await {
            self.progress_store
                .update_progress(transfer_id, row.bytes_transferred, TransferState::Cancelled)
                .await?;
        }
        Ok(Some(TransferEvent::Cancelled { peer_id, transfer_id }))
    }

    /// Cooperatively cancel an inbound transfer.
    pub async fn cancel_receive(&self, peer_id: u64, transfer_id: TransferId) -> Result<bool> {
        if self.receiver_ids.lock().get(&peer_id) != Some(&transfer_id) {
            return Ok(false);
        }
        self.receiver_ids.lock().remove(&peer_id);
        if let Some(mut receiver) = self.receivers.lock().remove(&peer_id) {
            receiver.cancel();
        }
        if let Ok(Some(row)) = self.progress_store.get(transfer_id).await {
            self.progress_store
                .update_progress(transfer_id, row.bytes_transferred, TransferState::Cancelled)
                .await?;
        }
        Ok(true)
    }

    /// A consistent snapshot of every non-terminal transfer with `peer_id`.
    pub async fn active_transfers(&self, peer_id: u64) -> Result<Vec<TransferProgress>> {
        let rows = self.progress_store.pending_for_peer(peer_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                TransferProgress {
                    transfer_id: row.transfer_id,
                    bytes_transferred: row.bytes_transferred,
                    total_bytes: row.size_bytes,
                    state: row.state,
                    speed_bps: 0.0,
                    eta_seconds: 0.0,
                }
                .with_eta()
            })
            .collect())
    }

    /// Transfers for `peer_id` a caller could resume.
    pub async fn resumable_transfers(&self, peer_id: u64) -> Result<Vec<PersistedTransfer>> {
        self.progress_store.pending_for_peer(peer_id).await
    }
}
