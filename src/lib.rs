//! # filepipe
//!
//! Chunked, resumable file transfer over a message-oriented data channel
//! (the kind of abstraction a WebRTC data channel or a relayed socket
//! exposes: ordered, reliable, but framed as discrete messages rather than
//! a byte stream).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         FILEPIPE MODULES                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────────────────────┐ │
//! │  │   Sender    │   │  Receiver   │   │        TransferService       │ │
//! │  │             │   │             │   │                              │ │
//! │  │ - hash+size │   │ - metadata  │   │ - routes inbound frames      │ │
//! │  │ - backpress.│   │ - temp file │   │ - per-peer concurrency cap   │ │
//! │  │ - cancel    │   │ - verify    │   │ - persists progress          │ │
//! │  └──────┬──────┘   └──────┬──────┘   └──────────────┬───────────────┘ │
//! │         │                 │                          │                 │
//! │         └─────────────────┴──────────────┬───────────┘                 │
//! │                                          │                             │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──┴──────────┐   ┌────────────┐ │
//! │  │   Chunker   │   │   Framing   │   │ Interfaces  │   │   Model    │ │
//! │  │             │   │             │   │             │   │            │ │
//! │  │ - read loop │   │ - wire      │   │ - Channel   │   │ - ids      │ │
//! │  │ - hashing   │   │   encode/   │   │ - FileStore │   │ - states   │ │
//! │  │             │   │   demux     │   │ - Progress  │   │ - metadata │ │
//! │  │             │   │             │   │ - Clock     │   │            │ │
//! │  └─────────────┘   └─────────────┘   └─────────────┘   └────────────┘ │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`model`] - Transfer identifiers, states, metadata and progress types
//! - [`framing`] - Wire encoding/decoding of the five frame kinds
//! - [`chunker`] - Streaming file reader that hashes while it reads
//! - [`interfaces`] - The `Channel`, `FileStore`, `ProgressStore`, `Clock` traits
//! - [`sender`] - Per-transfer outbound state machine
//! - [`receiver`] - Per-transfer inbound state machine
//! - [`service`] - Multi-transfer orchestrator built on top of sender/receiver
//!
//! ## Transfer Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          TRANSFER LIFECYCLE                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Sender side                          Receiver side                    │
//! │  ────────────                          ──────────────                   │
//! │  1. Hash + size the file                                                │
//! │  2. Emit Metadata frame      ─────►    1. Validate, open temp file      │
//! │  3. Stream Chunk frames      ─────►    2. Append + hash as they arrive  │
//! │     (backpressure-gated)                                                │
//! │  4. Emit EOF                 ─────►    3. Verify size, then hash        │
//! │                                         4. Hand bytes to FileStore      │
//! │                                                                         │
//! │  Either side may emit Cancel at any point before EOF; the other side    │
//! │  unlinks its staging file and transitions to Cancelled.                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod chunker;
pub mod error;
pub mod framing;
pub mod interfaces;
pub mod model;
pub mod receiver;
pub mod sender;
pub mod service;

/// Hand-written in-memory fakes for [`interfaces`], shared by every
/// module's test suite.
#[cfg(test)]
pub mod testing;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use error::{Error, ErrorKind, Result};
pub use framing::{demux, InboundFrame, OutboundFrame, WireMessage, CHUNK_SIZE};
pub use interfaces::{Channel, Clock, FileStore, ProgressStore, SystemClock};
pub use model::{
    FileMetadata, PersistedTransfer, StoredFile, TransferDirection, TransferId, TransferProgress,
    TransferState,
};
pub use receiver::Receiver;
pub use sender::{Sender, SenderHandle};
pub use service::{ServiceConfig, TransferEvent, TransferService};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
