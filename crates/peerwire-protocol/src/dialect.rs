//! Dialects -- interchangeable codec strategies for one protocol epoch.
//!
//! All wire-format knowledge lives behind [`Dialect`]: header parsing and
//! validation, whether a checksum follows the header, checksum verification,
//! body decoding and full-frame encoding. A channel holds one dialect for its
//! whole lifetime and never asks which one it has.
//!
//! Frame layout: 20-byte header chunk, optional 4-byte checksum, payload.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::epoch::{ProtocolEpoch, CURRENT_EPOCH};
use crate::header::{Command, Header, CHECKSUM_SIZE, HEADER_CHUNK_SIZE};
use crate::messages::Message;
use crate::network::Network;
use crate::wire::{payload_checksum, DecodeError};
use crate::ProtocolError;

/// Codec strategy for one protocol epoch on one network.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn network(&self) -> Network;

    fn epoch(&self) -> &ProtocolEpoch;

    /// Whether a checksum follows this header on the wire.
    fn requires_checksum(&self, header: &Header) -> bool;

    fn parse_header(&self, chunk: &[u8; HEADER_CHUNK_SIZE]) -> Header {
        Header::from_chunk(chunk)
    }

    /// Structural sanity: our magic, a well-formed command name and a payload
    /// length within the epoch limit. Unknown but well-formed commands pass.
    fn validate_header(&self, header: &Header) -> bool {
        header.magic == self.network().magic()
            && header.command.is_well_formed()
            && header.payload_length <= self.epoch().max_payload_bytes
    }

    fn parse_checksum(&self, bytes: &[u8; CHECKSUM_SIZE]) -> u32 {
        u32::from_le_bytes(*bytes)
    }

    /// True when the payload matches the header's checksum, or when no
    /// checksum is required and none was sent.
    fn verify_checksum(&self, header: &Header, payload: &[u8]) -> bool {
        match header.checksum {
            Some(expected) => expected == payload_checksum(payload),
            None => !self.requires_checksum(header),
        }
    }

    /// Decode the body announced by `header`.
    fn decode_body(&self, header: &Header, payload: &[u8]) -> Result<Message, DecodeError> {
        Message::decode(&header.command, payload, self.epoch())
    }

    /// Serialize a full frame: header, checksum when required, payload.
    fn encode(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        if let Message::Unknown { command } = message {
            return Err(ProtocolError::UnknownCommand(command.to_string()));
        }

        let mut body = BytesMut::new();
        message.encode_payload(&mut body);

        let max = self.epoch().max_payload_bytes;
        if body.len() > max as usize {
            return Err(ProtocolError::MessageTooLarge {
                size: body.len(),
                max,
            });
        }

        let mut header = Header {
            magic: self.network().magic(),
            command: message.command_string(),
            payload_length: body.len() as u32,
            checksum: None,
        };
        if self.requires_checksum(&header) {
            header.checksum = Some(payload_checksum(&body));
        }

        let mut frame = BytesMut::with_capacity(HEADER_CHUNK_SIZE + CHECKSUM_SIZE + body.len());
        header.encode(&mut frame);
        frame.extend_from_slice(&body);

        tracing::trace!(
            dialect = self.name(),
            command = %header.command,
            bytes = body.len(),
            "encoded message"
        );
        Ok(frame.freeze())
    }
}

/// Genesis-era layout: every command carries a checksum except the
/// handshake pair (version, verack).
#[derive(Debug, Clone)]
pub struct OriginalDialect {
    network: Network,
    epoch: ProtocolEpoch,
}

impl OriginalDialect {
    pub fn new(network: Network) -> Self {
        Self::with_epoch(network, *CURRENT_EPOCH)
    }

    pub fn with_epoch(network: Network, epoch: ProtocolEpoch) -> Self {
        Self { network, epoch }
    }
}

impl Dialect for OriginalDialect {
    fn name(&self) -> &'static str {
        "original"
    }

    fn network(&self) -> Network {
        self.network
    }

    fn epoch(&self) -> &ProtocolEpoch {
        &self.epoch
    }

    fn requires_checksum(&self, header: &Header) -> bool {
        !matches!(
            header.command.command(),
            Some(Command::Version | Command::Verack)
        )
    }
}

/// Later layout: every frame carries a checksum.
#[derive(Debug, Clone)]
pub struct ChecksummedDialect {
    network: Network,
    epoch: ProtocolEpoch,
}

impl ChecksummedDialect {
    pub fn new(network: Network) -> Self {
        Self::with_epoch(network, *CURRENT_EPOCH)
    }

    pub fn with_epoch(network: Network, epoch: ProtocolEpoch) -> Self {
        Self { network, epoch }
    }
}

impl Dialect for ChecksummedDialect {
    fn name(&self) -> &'static str {
        "checksummed"
    }

    fn network(&self) -> Network {
        self.network
    }

    fn epoch(&self) -> &ProtocolEpoch {
        &self.epoch
    }

    fn requires_checksum(&self, _header: &Header) -> bool {
        true
    }
}

/// Dialect selector as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Original,
    Checksummed,
}

impl DialectKind {
    pub fn build(self, network: Network) -> Arc<dyn Dialect> {
        match self {
            DialectKind::Original => Arc::new(OriginalDialect::new(network)),
            DialectKind::Checksummed => Arc::new(ChecksummedDialect::new(network)),
        }
    }
}
