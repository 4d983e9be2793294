//! Lazy chunk production and whole-file hashing.
//!
//! The chunker never materializes more than one [`CHUNK_SIZE`](crate::framing::CHUNK_SIZE)
//! chunk of the file in memory at a time, and the whole-file hash is
//! computed independently of chunk iteration so a resumed send does not
//! need to re-read (or re-hash) bytes the receiver already has.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::Result;
use crate::framing::CHUNK_SIZE;

const HASH_READ_BUF: usize = 8 * 1024;

/// One chunk read from the file: its starting offset, its bytes, and
/// whether it is the last chunk for the file.
#[derive(Debug, Clone)]
pub struct FileChunk {
    /// Cumulative byte offset of this chunk's first byte.
    pub offset: u64,
    /// The chunk's payload.
    pub bytes: Vec<u8>,
    /// True iff `offset + bytes.len() == size_bytes`.
    pub is_last: bool,
}

/// Size and SHA-256 hash of a file, computed by a single streaming pass.
pub async fn file_info(path: &Path) -> Result<(u64, String)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_READ_BUF];
    let mut total: u64 = 0;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((total, hex::encode(hasher.finalize())))
}

/// A finite, non-restartable sequence of [`FileChunk`]s starting at
/// `resume_offset` bytes into the file.
pub struct ChunkReader {
    file: tokio::fs::File,
    offset: u64,
    size: u64,
    chunk_size: usize,
}

impl ChunkReader {
    /// Open `path`, position the read cursor at `resume_offset`, and yield
    /// chunks of at most `chunk_size` bytes (the wire-normative value is
    /// [`CHUNK_SIZE`]; a smaller override is useful in tests that want to
    /// exercise multi-chunk behavior without large fixtures).
    pub async fn open(path: &Path, resume_offset: u64, chunk_size: usize) -> Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        file.seek(std::io::SeekFrom::Start(resume_offset)).await?;
        Ok(Self {
            file,
            offset: resume_offset,
            size,
            chunk_size,
        })
    }

    /// Total size of the file being chunked.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the next chunk, or `None` once the file is exhausted.
    ///
    /// An empty file (`size == 0`) with `resume_offset == 0` yields exactly
    /// one zero-length, `is_last = true` chunk, matching the "size equality
    /// at EOF" contract the receiver relies on.
    pub async fn next_chunk(&mut self) -> Result<Option<FileChunk>> {
        if self.offset > self.size {
            return Ok(None);
        }
        if self.offset == self.size && !(self.size == 0 && self.offset == 0) {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        let chunk_offset = self.offset;
        self.offset += filled as u64;
        let is_last = self.offset == self.size;

        if filled == 0 && self.size != 0 {
            // Exhausted on a non-empty file; nothing left to emit.
            return Ok(None);
        }

        let chunk = FileChunk {
            offset: chunk_offset,
            bytes: buf,
            is_last,
        };

        if self.size == 0 {
            // Mark the sentinel empty chunk consumed so a second call ends
            // the stream.
            self.offset = 1;
        }

        Ok(Some(chunk))
    }
}
