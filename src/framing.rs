//! Wire framing: constants, the five frame kinds, and the demux rule that
//! classifies an inbound message.
//!
//! The wire carries exactly five frame kinds. Metadata is UTF-8 JSON; Chunk
//! is a one-byte tag followed by raw bytes; EOF/Cancel/Ack/Error are short
//! reserved binary sentinels, each chosen so it can never be confused with
//! a JSON object or a tagged chunk.

use crate::error::{Error, Result};
use crate::model::FileMetadata;

/// Fixed chunk payload size for every chunk but possibly the last.
pub const CHUNK_SIZE: usize = 16384;

/// Outbound buffer-pressure threshold the sender backs off against.
pub const BUFFER_THRESHOLD: u64 = 65536;

/// One-byte tag prefixing every Chunk frame.
pub const CHUNK_TAG: u8 = 0x43; // 'C'

const EOF_SENTINEL: &[u8] = b"\0FT:EOF\0";
const CANCEL_SENTINEL: &[u8] = b"\0FT:CANCEL\0";
const ACK_SENTINEL: &[u8] = b"\0FT:ACK\0";
const ERROR_SENTINEL: &[u8] = b"\0FT:ERROR\0";

/// A message as it travels over the `Channel`: either UTF-8 text or an
/// opaque binary payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A textual message (the Metadata frame).
    Text(String),
    /// A binary message (Chunk, EOF, Cancel, Ack, Error).
    Binary(Vec<u8>),
}

impl WireMessage {
    fn as_bytes(&self) -> &[u8] {
        match self {
            WireMessage::Text(s) => s.as_bytes(),
            WireMessage::Binary(b) => b,
        }
    }
}

/// A frame ready to be handed to the sender's `Channel::send`.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// File metadata, sent once before the first chunk.
    Metadata(FileMetadata),
    /// One chunk of file data.
    Chunk(Vec<u8>),
    /// End of the chunk stream.
    Eof,
    /// Cooperative cancellation.
    Cancel,
}

impl OutboundFrame {
    /// Render this frame into the form the `Channel` transmits.
    pub fn into_wire(self) -> Result<WireMessage> {
        Ok(match self {
            OutboundFrame::Metadata(meta) => {
                #[derive(serde::Serialize)]
                struct Tagged<'a> {
                    #[serde(rename = "type")]
                    kind: &'static str,
                    #[serde(flatten)]
                    meta: &'a FileMetadata,
                }
                let tagged = Tagged {
                    kind: "metadata",
                    meta: &meta,
                };
                WireMessage::Text(serde_json::to_string(&tagged)?)
            }
            OutboundFrame::Chunk(bytes) => {
                let mut wire = Vec::with_capacity(bytes.len() + 1);
                wire.push(CHUNK_TAG);
                wire.extend_from_slice(&bytes);
                WireMessage::Binary(wire)
            }
            OutboundFrame::Eof => WireMessage::Binary(EOF_SENTINEL.to_vec()),
            OutboundFrame::Cancel => WireMessage::Binary(CANCEL_SENTINEL.to_vec()),
        })
    }
}

/// The classification of an inbound message, as produced by [`demux`].
#[derive(Debug)]
pub enum InboundFrame {
    /// A parsed, `"type": "metadata"` JSON object.
    Metadata(FileMetadata),
    /// A chunk payload (tag byte already stripped).
    Chunk(Vec<u8>),
    /// End of stream.
    Eof,
    /// Cancellation.
    Cancel,
    /// Reserved, currently a no-op for receivers.
    Ack,
    /// Reserved, currently a no-op for receivers.
    ErrorSentinel,
    /// Did not match any known frame kind; callers should log and drop.
    Unknown,
}

/// Classify an inbound wire message per the demux rule: exact-sentinel
/// match first, then a `{` prefix means JSON metadata, then a `0x43` prefix
/// means Chunk, otherwise the frame is unrecognized.
pub fn demux(msg: &WireMessage) -> InboundFrame {
    let bytes = msg.as_bytes();

    if bytes == EOF_SENTINEL {
        return InboundFrame::Eof;
    }
    if bytes == CANCEL_SENTINEL {
        return InboundFrame::Cancel;
    }
    if bytes == ACK_SENTINEL {
        return InboundFrame::Ack;
    }
    if bytes == ERROR_SENTINEL {
        return InboundFrame::ErrorSentinel;
    }

    if bytes.first() == Some(&b'{') {
        return match parse_metadata(bytes) {
            Ok(meta) => InboundFrame::Metadata(meta),
            Err(_) => InboundFrame::Unknown,
        };
    }

    if bytes.first() == Some(&CHUNK_TAG) {
        return InboundFrame::Chunk(bytes[1..].to_vec());
    }

    InboundFrame::Unknown
}

fn parse_metadata(bytes: &[u8]) -> Result<FileMetadata> {
    #[derive(serde::Deserialize)]
    struct Tagged {
        #[serde(rename = "type")]
        kind: String,
        #[serde(flatten)]
        meta: FileMetadata,
    }
    let tagged: Tagged = serde_json::from_slice(bytes)?;
    if tagged.kind != "metadata" {
        return Err(Error::Protocol(format!(
            "unexpected frame type {:?}",
            tagged.kind
        )));
    }
    Ok(tagged.meta)
}
