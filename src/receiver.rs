//! One-file inbound state machine: accept metadata, stream chunks to an
//! exclusive temp file while hashing, verify at EOF, hand the bytes to a
//! [`FileStore`].

use std::io::{Read, Seek, SeekFrom, Write};

use sha2::{Digest, Sha256};
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::interfaces::FileStore;
use crate::model::{FileMetadata, StoredFile, TransferId, TransferState};

/// Receives one file's worth of chunks and assembles it on disk.
///
/// Not restartable: a receiver that reaches a terminal state cannot be
/// reused. A resumed transfer is a fresh `Receiver` seeded with whatever
/// `resume_offset` the sender negotiated.
pub struct Receiver<F: FileStore> {
    file_store: std::sync::Arc<F>,
    state: TransferState,
    metadata: Option<FileMetadata>,
    temp: Option<tempfile::NamedTempFile>,
    hasher: Sha256,
    bytes_received: u64,
}

impl<F: FileStore> Receiver<F> {
    /// A fresh receiver in `Pending`, backed by `file_store` for the
    /// eventual completed save.
    pub fn new(file_store: std::sync::Arc<F>) -> Self {
        Self {
            file_store,
            state: TransferState::Pending,
            metadata: None,
            temp: None,
            hasher: Sha256::new(),
            bytes_received: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Bytes received so far; usable as a resume offset for a follow-up
    /// send negotiated out of band.
    pub fn resume_offset(&self) -> u64 {
        self.bytes_received
    }

    /// Accept (or reject) a Metadata frame.
    ///
    /// Rejects a second metadata frame on an already-`Active` receiver, a
    /// filename containing path separators or `..`, or a malformed
    /// `hash_hex`. On acceptance, opens the exclusive temp file and
    /// transitions to `Active`.
    pub async fn on_metadata(&mut self, metadata: FileMetadata) -> Result<()> {
        if self.state != TransferState::Pending {
            self.fail();
            return Err(Error::Protocol(format!(
                "duplicate metadata frame while in state {:?}",
                self.state
            )));
        }

        validate_metadata(&metadata)?;

        let temp = tempfile::Builder::new()
            .prefix("ft-")
            .suffix(".tmp")
            .tempfile()?;

        self.temp = Some(temp);
        self.metadata = Some(metadata);
        self.state = TransferState::Active;
        Ok(())
    }

    /// Append one chunk's bytes at the current write position.
    pub async fn on_chunk(&mut self, bytes: Vec<u8>) -> Result<()> {
        if self.state != TransferState::Active {
            return Err(Error::Protocol(format!(
                "chunk received while in state {:?}",
                self.state
            )));
        }

        let metadata = self.metadata.as_ref().expect("Active implies metadata set");
        let next_total = self.bytes_received + bytes.len() as u64;
        if next_total > metadata.size_bytes {
            self.fail();
            return Err(Error::Protocol(format!(
                "chunk extends transfer past declared size {}",
                metadata.size_bytes
            )));
        }

        self.hasher.update(&bytes);
        let temp = self.temp.as_mut().expect("Active implies temp file open");
        temp.write_all(&bytes)?;
        self.bytes_received = next_total;
        Ok(())
    }

    /// Finalize the transfer: verify size and hash, then hand the bytes to
    /// the `FileStore`.
    pub async fn on_eof(&mut self) -> Result<StoredFile> {
        if self.state != TransferState::Active {
            return Err(Error::Protocol(format!(
                "EOF received while in state {:?}",
                self.state
            )));
        }

        let metadata = self.metadata.clone().expect("Active implies metadata set");

        let temp = self.temp.as_mut().expect("Active implies temp file open");
        temp.flush()?;

        if self.bytes_received != metadata.size_bytes {
            self.fail();
            return Err(Error::SizeMismatch {
                expected: metadata.size_bytes,
                actual: self.bytes_received,
            });
        }

        let actual_hash = hex::encode(self.hasher.clone().finalize());
        if actual_hash != metadata.hash_hex {
            error!(transfer_id = %metadata.transfer_id, "hash mismatch at EOF");
            self.fail();
            return Err(Error::HashMismatch {
                expected: metadata.hash_hex,
                actual: actual_hash,
            });
        }

        let mut bytes = Vec::with_capacity(metadata.size_bytes as usize);
        temp.seek(SeekFrom::Start(0))?;
        temp.read_to_end(&mut bytes)?;

        match self
            .file_store
            .save(bytes, &metadata.filename, metadata.transfer_id)
            .await
        {
            Ok(stored) => {
                self.state = TransferState::Complete;
                self.temp = None; // NamedTempFile::drop unlinks it.
                Ok(stored)
            }
            Err(e) => {
                self.fail();
                Err(Error::Storage(e.to_string()))
            }
        }
    }

    /// The peer sent a Cancel frame.
    pub fn on_cancel(&mut self) {
        self.cancel();
    }

    /// The local caller requested cancellation.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            warn!("receiver cancelled");
            self.state = TransferState::Cancelled;
            self.temp = None;
        }
    }

    fn fail(&mut self) {
        self.state = TransferState::Failed;
        self.temp = None;
    }

    /// Whether this receiver's temp file has been cleaned up (it always
    /// has been once a terminal state is reached).
    #[cfg(test)]
    fn temp_file_exists(&self) -> bool {
        self.temp.is_some()
    }
}

fn validate_metadata(metadata: &FileMetadata) -> Result<()> {
    if metadata.filename.contains('/') || metadata.filename.contains('\\') || metadata.filename == ".." {
        return Err(Error::InvalidMetadata(format!(
            "filename {:?} contains a path separator or parent-directory token",
            metadata.filename
        )));
    }
    if metadata.hash_hex.len() != 64
        || !metadata
            .hash_hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(Error::InvalidMetadata(format!(
            "hash_hex {:?} is not 64 lowercase hex characters",
            metadata.hash_hex
        )));
    }
    Ok(())
}
