//! Peerwire Protocol -- wire types, message codec, dialects.
//!
//! Bitcoin-compatible framing over TCP: 20-byte header chunk (magic, command,
//! length), a 4-byte checksum when the active dialect requires one, then the
//! payload. No I/O happens in this crate.

pub mod dialect;
pub mod epoch;
pub mod header;
pub mod messages;
pub mod network;
pub mod wire;

pub use dialect::{ChecksummedDialect, Dialect, DialectKind, OriginalDialect};
pub use epoch::{ProtocolEpoch, CURRENT_EPOCH, GENESIS_EPOCH};
pub use header::{Command, CommandString, Header, CHECKSUM_SIZE, COMMAND_SIZE, HEADER_CHUNK_SIZE};
pub use messages::*;
pub use network::Network;
pub use wire::{payload_checksum, DecodeError, Decodable, Encodable, Hash256};

/// Encoding failures. Decoding has its own [`DecodeError`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: u32 },
    #[error("invalid command name: {0:?}")]
    InvalidCommand(String),
    #[error("cannot encode unknown command {0}")]
    UnknownCommand(String),
}
