//! Wire message types.
//!
//! One struct per command, each carrying its own `Encodable`/`Decodable`
//! impls, gathered into the [`Message`] enum. Commands outside the fixed set
//! decode to [`Message::Unknown`] so the reader can drain and ignore them.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use bytes::BufMut;

use crate::header::{Command, CommandString};
use crate::wire::{
    put_compact_size, put_var_bytes, DecodeError, Decodable, Encodable, Hash256, WireReader,
};
use crate::ProtocolEpoch;

/// Service bit for a node serving the full chain.
pub const NODE_NETWORK: u64 = 1;

// ============================================================================
// Addresses
// ============================================================================

/// Network address as carried in version and addr messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddress {
    pub services: u64,
    /// IPv6, or IPv4 mapped as ::ffff:a.b.c.d.
    pub ip: Ipv6Addr,
    pub port: u16,
}

impl NetAddress {
    pub fn new(services: u64, addr: SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        Self {
            services,
            ip,
            port: addr.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let ip = match self.ip.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(self.ip),
        };
        SocketAddr::new(ip, self.port)
    }
}

impl Encodable for NetAddress {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u64_le(self.services);
        dst.put_slice(&self.ip.octets());
        dst.put_u16(self.port);
    }
}

impl Decodable for NetAddress {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            services: reader.u64_le()?,
            ip: Ipv6Addr::from(reader.array::<16>()?),
            port: reader.u16_be()?,
        })
    }
}

/// Address entry in an addr message: last-seen time plus the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampedAddress {
    pub time: u32,
    pub address: NetAddress,
}

impl Encodable for TimestampedAddress {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.time);
        self.address.encode(dst);
    }
}

impl Decodable for TimestampedAddress {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            time: reader.u32_le()?,
            address: NetAddress::decode(reader)?,
        })
    }
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    Error,
    Tx,
    Block,
    Other(u32),
}

impl From<u32> for InvType {
    fn from(value: u32) -> Self {
        match value {
            0 => InvType::Error,
            1 => InvType::Tx,
            2 => InvType::Block,
            other => InvType::Other(other),
        }
    }
}

impl From<InvType> for u32 {
    fn from(value: InvType) -> Self {
        match value {
            InvType::Error => 0,
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvVector {
    pub kind: InvType,
    pub hash: Hash256,
}

impl Encodable for InvVector {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.kind.into());
        self.hash.encode(dst);
    }
}

impl Decodable for InvVector {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            kind: InvType::from(reader.u32_le()?),
            hash: Hash256::decode(reader)?,
        })
    }
}

fn encode_inventory<B: BufMut>(inventory: &[InvVector], dst: &mut B) {
    put_compact_size(dst, inventory.len() as u64);
    for entry in inventory {
        entry.encode(dst);
    }
}

fn decode_inventory(reader: &mut WireReader<'_>) -> Result<Vec<InvVector>, DecodeError> {
    let count = reader.count(reader.epoch().max_inventory_entries)?;
    reader.list(count)
}

// ============================================================================
// Connection messages
// ============================================================================

/// Handshake, sent unsolicited as the first message on every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    /// The peer's address as we see it.
    pub receiver: NetAddress,
    /// Our own address.
    pub sender: NetAddress,
    pub nonce: u64,
    pub sub_version: String,
    pub start_height: i32,
}

impl Encodable for Version {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_i32_le(self.version);
        dst.put_u64_le(self.services);
        dst.put_i64_le(self.timestamp);
        self.receiver.encode(dst);
        self.sender.encode(dst);
        dst.put_u64_le(self.nonce);
        put_var_bytes(dst, self.sub_version.as_bytes());
        dst.put_i32_le(self.start_height);
    }
}

impl Decodable for Version {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let version = Self {
            version: reader.i32_le()?,
            services: reader.u64_le()?,
            timestamp: reader.i64_le()?,
            receiver: NetAddress::decode(reader)?,
            sender: NetAddress::decode(reader)?,
            nonce: reader.u64_le()?,
            sub_version: reader.var_str()?,
            start_height: reader.i32_le()?,
        };
        // Later protocol versions append fields (relay flag).
        reader.skip_rest();
        Ok(version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetAddr;

macro_rules! empty_payload {
    ($ty:ty) => {
        impl Encodable for $ty {
            fn encode<B: BufMut>(&self, _dst: &mut B) {}
        }

        impl Decodable for $ty {
            fn decode(_reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
                Ok(Self)
            }
        }
    };
}

empty_payload!(Verack);
empty_payload!(GetAddr);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Addr {
    pub addresses: Vec<TimestampedAddress>,
}

impl Encodable for Addr {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        put_compact_size(dst, self.addresses.len() as u64);
        for entry in &self.addresses {
            entry.encode(dst);
        }
    }
}

impl Decodable for Addr {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let count = reader.count(reader.epoch().max_addr_entries)?;
        Ok(Self {
            addresses: reader.list(count)?,
        })
    }
}

// ============================================================================
// Inventory messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inv {
    pub inventory: Vec<InvVector>,
}

impl Encodable for Inv {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        encode_inventory(&self.inventory, dst);
    }
}

impl Decodable for Inv {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            inventory: decode_inventory(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetData {
    pub inventory: Vec<InvVector>,
}

impl Encodable for GetData {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        encode_inventory(&self.inventory, dst);
    }
}

impl Decodable for GetData {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            inventory: decode_inventory(reader)?,
        })
    }
}

/// Block request by locator: the peer answers with inv for blocks after the
/// first locator hash it knows, up to `hash_stop` (zero = as many as allowed).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetBlocks {
    pub version: u32,
    pub locator: Vec<Hash256>,
    pub hash_stop: Hash256,
}

impl Encodable for GetBlocks {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.version);
        put_compact_size(dst, self.locator.len() as u64);
        for hash in &self.locator {
            hash.encode(dst);
        }
        self.hash_stop.encode(dst);
    }
}

impl Decodable for GetBlocks {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let version = reader.u32_le()?;
        let count = reader.count(reader.epoch().max_locator_hashes)?;
        Ok(Self {
            version,
            locator: reader.list(count)?,
            hash_stop: Hash256::decode(reader)?,
        })
    }
}

// ============================================================================
// Blocks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Encodable for BlockHeader {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.version);
        self.prev_block.encode(dst);
        self.merkle_root.encode(dst);
        dst.put_u32_le(self.time);
        dst.put_u32_le(self.bits);
        dst.put_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            version: reader.u32_le()?,
            prev_block: Hash256::decode(reader)?,
            merkle_root: Hash256::decode(reader)?,
            time: reader.u32_le()?,
            bits: reader.u32_le()?,
            nonce: reader.u32_le()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl Encodable for TxIn {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        self.previous_output.hash.encode(dst);
        dst.put_u32_le(self.previous_output.index);
        put_var_bytes(dst, &self.script_sig);
        dst.put_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            previous_output: OutPoint {
                hash: Hash256::decode(reader)?,
                index: reader.u32_le()?,
            },
            script_sig: reader.var_bytes()?,
            sequence: reader.u32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_i64_le(self.value);
        put_var_bytes(dst, &self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            value: reader.i64_le()?,
            script_pubkey: reader.var_bytes()?,
        })
    }
}

/// Legacy (pre-witness) transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Encodable for Transaction {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_le(self.version);
        put_compact_size(dst, self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode(dst);
        }
        put_compact_size(dst, self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(dst);
        }
        dst.put_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let version = reader.u32_le()?;
        let input_count = reader.count(u64::MAX)?;
        let inputs = reader.list(input_count)?;
        let output_count = reader.count(u64::MAX)?;
        let outputs = reader.list(output_count)?;
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time: reader.u32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Encodable for Block {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        self.header.encode(dst);
        put_compact_size(dst, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode(dst);
        }
    }
}

impl Decodable for Block {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let header = BlockHeader::decode(reader)?;
        let count = reader.count(u64::MAX)?;
        Ok(Self {
            header,
            transactions: reader.list(count)?,
        })
    }
}

// ============================================================================
// Message enum
// ============================================================================

/// Every message a channel can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(Version),
    Verack(Verack),
    GetAddr(GetAddr),
    GetData(GetData),
    GetBlocks(GetBlocks),
    Addr(Addr),
    Inv(Inv),
    Block(Block),
    /// Well-formed command outside the known set. The payload is not kept.
    Unknown { command: CommandString },
}

impl Message {
    fn kind(&self) -> Result<Command, CommandString> {
        Ok(match self {
            Message::Version(_) => Command::Version,
            Message::Verack(_) => Command::Verack,
            Message::GetAddr(_) => Command::GetAddr,
            Message::GetData(_) => Command::GetData,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::Addr(_) => Command::Addr,
            Message::Inv(_) => Command::Inv,
            Message::Block(_) => Command::Block,
            Message::Unknown { command } => return Err(*command),
        })
    }

    /// The known command, `None` for [`Message::Unknown`].
    pub fn command(&self) -> Option<Command> {
        self.kind().ok()
    }

    /// The command field to put in this message's header.
    pub fn command_string(&self) -> CommandString {
        match self.kind() {
            Ok(command) => command.into(),
            Err(raw) => raw,
        }
    }

    /// Serialize the body. `Unknown` has none.
    pub fn encode_payload<B: BufMut>(&self, dst: &mut B) {
        match self {
            Message::Version(m) => m.encode(dst),
            Message::Verack(m) => m.encode(dst),
            Message::GetAddr(m) => m.encode(dst),
            Message::GetData(m) => m.encode(dst),
            Message::GetBlocks(m) => m.encode(dst),
            Message::Addr(m) => m.encode(dst),
            Message::Inv(m) => m.encode(dst),
            Message::Block(m) => m.encode(dst),
            Message::Unknown { .. } => {}
        }
    }

    /// Decode the body announced by `command`. Unknown commands succeed as
    /// [`Message::Unknown`] without looking at the payload.
    pub fn decode(
        command: &CommandString,
        payload: &[u8],
        epoch: &ProtocolEpoch,
    ) -> Result<Message, DecodeError> {
        let Some(known) = command.command() else {
            return Ok(Message::Unknown { command: *command });
        };
        let mut reader = WireReader::new(payload, epoch);
        let message = match known {
            Command::Version => Message::Version(Version::decode(&mut reader)?),
            Command::Verack => Message::Verack(Verack::decode(&mut reader)?),
            Command::GetAddr => Message::GetAddr(GetAddr::decode(&mut reader)?),
            Command::GetData => Message::GetData(GetData::decode(&mut reader)?),
            Command::GetBlocks => Message::GetBlocks(GetBlocks::decode(&mut reader)?),
            Command::Addr => Message::Addr(Addr::decode(&mut reader)?),
            Command::Inv => Message::Inv(Inv::decode(&mut reader)?),
            Command::Block => Message::Block(Block::decode(&mut reader)?),
        };
        reader.finish()?;
        Ok(message)
    }
}

macro_rules! into_message {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Message {
                fn from(payload: $variant) -> Self {
                    Message::$variant(payload)
                }
            }
        )*
    };
}

into_message!(Version, Verack, GetAddr, GetData, GetBlocks, Addr, Inv, Block);
