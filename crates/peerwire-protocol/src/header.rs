//! Message header: magic, command, payload length and the optional checksum.
//!
//! The fixed part is 20 bytes:
//!
//! ```text
//! 0..4    magic            (little-endian u32)
//! 4..16   command          (ASCII, NUL padded)
//! 16..20  payload length   (little-endian u32)
//! ```
//!
//! A 4-byte checksum follows when the dialect requires it for the command.

use std::fmt;

use bytes::BufMut;

use crate::ProtocolError;

/// Fixed header bytes before the optional checksum.
pub const HEADER_CHUNK_SIZE: usize = 20;

/// Checksum size in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Width of the command field.
pub const COMMAND_SIZE: usize = 12;

/// The closed set of commands this node understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Verack,
    GetAddr,
    GetData,
    GetBlocks,
    Addr,
    Inv,
    Block,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Version,
        Command::Verack,
        Command::GetAddr,
        Command::GetData,
        Command::GetBlocks,
        Command::Addr,
        Command::Inv,
        Command::Block,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::GetAddr => "getaddr",
            Command::GetData => "getdata",
            Command::GetBlocks => "getblocks",
            Command::Addr => "addr",
            Command::Inv => "inv",
            Command::Block => "block",
        }
    }

    pub fn from_name(name: &str) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw 12-byte command field as it appeared on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandString([u8; COMMAND_SIZE]);

impl CommandString {
    pub fn from_bytes(bytes: [u8; COMMAND_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from a name: 1 to 12 printable ASCII characters.
    pub fn new(name: &str) -> Result<Self, ProtocolError> {
        let bytes = name.as_bytes();
        if bytes.is_empty()
            || bytes.len() > COMMAND_SIZE
            || !bytes.iter().all(|b| b.is_ascii_graphic())
        {
            return Err(ProtocolError::InvalidCommand(name.to_string()));
        }
        let mut padded = [0u8; COMMAND_SIZE];
        padded[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(padded))
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_SIZE] {
        &self.0
    }

    /// The command name, if the field is printable ASCII followed only by
    /// NUL padding.
    pub fn name(&self) -> Option<&str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
        let (name, padding) = self.0.split_at(end);
        if name.is_empty()
            || !name.iter().all(|b| b.is_ascii_graphic())
            || padding.iter().any(|&b| b != 0)
        {
            return None;
        }
        std::str::from_utf8(name).ok()
    }

    pub fn is_well_formed(&self) -> bool {
        self.name().is_some()
    }

    /// The known command this names, if any.
    pub fn command(&self) -> Option<Command> {
        self.name().and_then(Command::from_name)
    }
}

impl From<Command> for CommandString {
    fn from(command: Command) -> Self {
        let mut padded = [0u8; COMMAND_SIZE];
        let name = command.name().as_bytes();
        padded[..name.len()].copy_from_slice(name);
        Self(padded)
    }
}

impl fmt::Display for CommandString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{}", hex::encode(self.0)),
        }
    }
}

impl fmt::Debug for CommandString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandString({self})")
    }
}

/// A parsed header. `checksum` is filled in only when the dialect required
/// one and it has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub command: CommandString,
    pub payload_length: u32,
    pub checksum: Option<u32>,
}

impl Header {
    /// Split the fixed 20-byte chunk into its fields. Never fails; whether the
    /// fields make sense is decided by the dialect's validation.
    pub fn from_chunk(chunk: &[u8; HEADER_CHUNK_SIZE]) -> Self {
        let magic = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let mut command = [0u8; COMMAND_SIZE];
        command.copy_from_slice(&chunk[4..16]);
        let payload_length = u32::from_le_bytes([chunk[16], chunk[17], chunk[18], chunk[19]]);
        Self {
            magic,
            command: CommandString(command),
            payload_length,
            checksum: None,
        }
    }

    /// Write the fixed chunk followed by the checksum when one is set.
    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.magic);
        dst.put_slice(&self.command.0);
        dst.put_u32_le(self.payload_length);
        if let Some(checksum) = self.checksum {
            dst.put_u32_le(checksum);
        }
    }
}
