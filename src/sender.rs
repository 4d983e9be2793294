//! One-file outbound state machine: hash the file, emit metadata, stream
//! chunks against a backpressure-bounded channel, emit EOF.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chunker::{file_info, ChunkReader};
use crate::error::{Error, Result};
use crate::framing::{OutboundFrame, BUFFER_THRESHOLD};
use crate::interfaces::{Channel, Clock};
use crate::model::{TransferId, TransferProgress, TransferState};

/// Interval at which the sender polls `buffered_amount()` while backing off.
const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A cooperative cancellation flag shared between a [`Sender`] and whoever
/// holds its [`SenderHandle`].
#[derive(Clone, Default)]
pub struct SenderHandle {
    cancel: Arc<AtomicBool>,
}

impl SenderHandle {
    /// Request cancellation. Idempotent; wakes any pending backpressure wait
    /// within one poll interval.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Streams one file to a single [`Channel`].
///
/// One-shot: a `Sender` is consumed by a single [`Sender::send`] call. A
/// resumed transfer is a fresh `Sender` with the same `transfer_id` and a
/// non-zero `resume_offset`.
pub struct Sender<C: Channel> {
    channel: Arc<C>,
    handle: SenderHandle,
    chunk_size: usize,
}

impl<C: Channel> Sender<C> {
    /// Build a sender over `channel` using the wire-normative chunk size,
    /// returning it alongside a handle the caller can use to request
    /// cancellation from another task.
    pub fn new(channel: Arc<C>) -> (Self, SenderHandle) {
        Self::with_chunk_size(channel, crate::framing::CHUNK_SIZE)
    }

    /// Like [`Sender::new`], overriding the chunk size (tests only need
    /// this to exercise multi-chunk behavior without large fixtures; wire
    /// peers always expect [`crate::framing::CHUNK_SIZE`]).
    pub fn with_chunk_size(channel: Arc<C>, chunk_size: usize) -> (Self, SenderHandle) {
        let handle = SenderHandle::default();
        (
            Self {
                channel,
                handle: handle.clone(),
                chunk_size,
            },
            handle,
        )
    }

    /// Stream `file_path` as `transfer_id`, starting from `resume_offset`
    /// bytes in. `on_progress` is invoked after every chunk with a
    /// monotonically non-decreasing `bytes_transferred`.
    pub async fn send(
        &self,
        file_path: &Path,
        transfer_id: TransferId,
        resume_offset: u64,
        mime_type: &str,
        clock: &dyn Clock,
        mut on_progress: impl FnMut(TransferProgress),
    ) -> Result<()> {
        let start_millis = clock.now_millis();

        // Unconditional even on resume: the receiver validates the whole
        // file against this hash regardless of where streaming starts.
        let (size_bytes, hash_hex) = file_info(file_path).await?;

        let filename = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        let metadata = crate::model::FileMetadata {
            transfer_id,
            filename,
            size_bytes,
            hash_hex,
            mime_type: mime_type.to_string(),
        };

        self.send_frame(OutboundFrame::Metadata(metadata)).await?;

        let mut reader = ChunkReader::open(file_path, resume_offset, self.chunk_size).await?;
        let mut bytes_sent = resume_offset;

        loop {
            if self.handle.is_cancelled() {
                self.send_frame(OutboundFrame::Cancel).await.ok();
                warn!(%transfer_id, "sender cancelled");
                return Err(Error::Cancelled);
            }

            self.wait_for_buffer_capacity().await?;

            let chunk = match reader.next_chunk().await? {
                Some(chunk) => chunk,
                None => break,
            };

            let chunk_len = chunk.bytes.len() as u64;
            self.send_frame(OutboundFrame::Chunk(chunk.bytes)).await?;
            bytes_sent += chunk_len;

            let elapsed_secs = ((clock.now_millis() - start_millis).max(1)) as f64 / 1000.0;
            let speed_bps = bytes_sent as f64 / elapsed_secs;

            on_progress(
                TransferProgress {
                    transfer_id,
                    bytes_transferred: bytes_sent,
                    total_bytes: size_bytes,
                    state: TransferState::Active,
                    speed_bps,
                    eta_seconds: 0.0,
                }
                .with_eta(),
            );
        }

        self.send_frame(OutboundFrame::Eof).await?;
        info!(%transfer_id, bytes_sent, "sender complete");
        Ok(())
    }

    async fn send_frame(&self, frame: OutboundFrame) -> Result<()> {
        let wire = frame.into_wire()?;
        self.channel
            .send(wire)
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }

    async fn wait_for_buffer_capacity(&self) -> Result<()> {
        while self.channel.buffered_amount() > BUFFER_THRESHOLD {
            if self.handle.is_cancelled() {
                return Ok(());
            }
            tokio::time::sleep(BACKPRESSURE_POLL_INTERVAL).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{demux, InboundFrame, CHUNK_SIZE};
    use crate::testing::{FakeChannel, FakeClock};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f
    }

    #[tokio::test]
    async fn happy_path_emits_metadata_one_chunk_and_eof() {
        let file = write_file(b"Hello, world!\n");
        let channel = FakeChannel::new();
        let (sender, _handle) = Sender::new(Arc::new(channel.clone()));
        let clock = FakeClock::new();
        let mut progresses = Vec::new();

        sender
            .send(
                file.path(),
                TransferId::new(),
                0,
                "text/plain",
                &clock,
                |p| progresses.push(p),
            )
            .await
            .unwrap();

        let frames = channel.sent_frames();
        assert_eq!(frames.len(), 3);
        assert!(matches!(demux(&frames[0]), InboundFrame::Metadata(_)));
        match demux(&frames[1]) {
            InboundFrame::Chunk(bytes) => assert_eq!(bytes, b"Hello, world!\n"),
            other => panic!("expected Chunk, got {:?}", other),
        }
        assert!(matches!(demux(&frames[2]), InboundFrame::Eof));

        assert_eq!(progresses.len(), 1);
        assert_eq!(progresses[0].bytes_transferred, 14);
    }

    #[tokio::test]
    async fn exact_chunk_boundary_file() {
        let file = write_file(&vec![0u8; CHUNK_SIZE]);
        let channel = FakeChannel::new();
        let (sender, _handle) = Sender::new(Arc::new(channel.clone()));
        let clock = FakeClock::new();

        sender
            .send(file.path(), TransferId::new(), 0, "application/octet-stream", &clock, |_| {})
            .await
            .unwrap();

        let frames = channel.sent_frames();
        assert_eq!(frames.len(), 3);
    }

    #[tokio::test]
    async fn chunk_size_override_splits_a_small_file_into_several_chunks() {
        let file = write_file(&vec![2u8; 100]);
        let channel = FakeChannel::new();
        let (sender, _handle) = Sender::with_chunk_size(Arc::new(channel.clone()), 30);
        let clock = FakeClock::new();

        sender
            .send(file.path(), TransferId::new(), 0, "application/octet-stream", &clock, |_| {})
            .await
            .unwrap();

        let frames = channel.sent_frames();
        // metadata + 4 chunks of 30/30/30/10 + eof
        assert_eq!(frames.len(), 6);
    }

    #[tokio::test]
    async fn progress_is_monotonic_across_multiple_chunks() {
        let file = write_file(&vec![5u8; CHUNK_SIZE * 3 + 10]);
        let channel = FakeChannel::new();
        let (sender, _handle) = Sender::new(Arc::new(channel.clone()));
        let clock = FakeClock::new();
        let mut last = 0u64;

        sender
            .send(file.path(), TransferId::new(), 0, "application/octet-stream", &clock, |p| {
                assert!(p.bytes_transferred >= last);
                last = p.bytes_transferred;
            })
            .await
            .unwrap();

        assert_eq!(last, (CHUNK_SIZE * 3 + 10) as u64);
    }

    #[tokio::test]
    async fn waits_for_buffer_to_drain_before_sending_next_chunk() {
        let file = write_file(&vec![1u8; CHUNK_SIZE * 2]);
        let channel = FakeChannel::new();
        channel.set_buffered_amount(1_000_000);
        let (sender, _handle) = Sender::new(Arc::new(channel.clone()));
        let clock = FakeClock::new();

        // Drain the buffer shortly after the send starts.
        let drain_channel = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drain_channel.set_buffered_amount(0);
        });

        sender
            .send(file.path(), TransferId::new(), 0, "application/octet-stream", &clock, |_| {})
            .await
            .unwrap();

        assert_eq!(channel.sent_frames().len(), 3);
    }

    #[tokio::test]
    async fn cancel_before_final_chunk_emits_cancel_frame_and_errors() {
        let file = write_file(&vec![3u8; CHUNK_SIZE * 5]);
        let channel = FakeChannel::new();
        let (sender, handle) = Sender::new(Arc::new(channel.clone()));
        let clock = FakeClock::new();

        handle.cancel();

        let result = sender
            .send(file.path(), TransferId::new(), 0, "application/octet-stream", &clock, |_| {})
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        let frames = channel.sent_frames();
        // Metadata always goes out first; the cancel check happens before
        // the first chunk.
        assert!(frames.iter().any(|f| matches!(demux(f), InboundFrame::Cancel)));
    }

    #[tokio::test]
    async fn channel_send_failure_is_propagated() {
        let file = write_file(b"data");
        let channel = FakeChannel::new();
        channel.fail_next_send();
        let (sender, _handle) = Sender::new(Arc::new(channel));
        let clock = FakeClock::new();

        let result = sender
            .send(file.path(), TransferId::new(), 0, "text/plain", &clock, |_| {})
            .await;

        assert!(matches!(result, Err(Error::Channel(_))));
    }

    #[tokio::test]
    async fn missing_file_is_a_fatal_producer_error() {
        let channel = FakeChannel::new();
        let (sender, _handle) = Sender::new(Arc::new(channel));
        let clock = FakeClock::new();

        let result = sender
            .send(
                Path::new("/no/such/file"),
                TransferId::new(),
                0,
                "text/plain",
                &clock,
                |_| {},
            )
            .await;

        assert!(result.is_err());
    }
}
