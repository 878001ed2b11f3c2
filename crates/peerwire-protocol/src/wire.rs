//! Low-level wire primitives: little-endian integers, CompactSize, var_str,
//! 32-byte hashes and the payload checksum.
//!
//! Every message body is built from these. Readers never panic: running off
//! the end of a payload is a [`DecodeError::Truncated`].

use std::fmt;

use bytes::{Buf, BufMut};
use sha2::{Digest, Sha256};

use crate::epoch::ProtocolEpoch;

/// Body decode failures. Distinct from I/O errors: the bytes arrived, they
/// just do not form the message the header announced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),
    #[error("too many entries: {count} (max {max})")]
    TooManyEntries { count: u64, max: u64 },
    #[error("non-canonical CompactSize encoding")]
    NonCanonicalCompactSize,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// Types that serialize themselves onto the wire.
pub trait Encodable {
    fn encode<B: BufMut>(&self, dst: &mut B);

    /// Encode into a fresh buffer.
    fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Types that can be read back from a [`WireReader`].
pub trait Decodable: Sized {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError>;
}

/// A 32-byte hash, stored in wire (internal) byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);
}

/// Displayed byte-reversed, the way block explorers show hashes.
impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({self})")
    }
}

impl Encodable for Hash256 {
    fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_slice(&self.0);
    }
}

impl Decodable for Hash256 {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        reader.array::<32>().map(Hash256)
    }
}

/// First four bytes of SHA-256(SHA-256(payload)) as a little-endian u32.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    let once = Sha256::digest(payload);
    let twice = Sha256::digest(once);
    u32::from_le_bytes([twice[0], twice[1], twice[2], twice[3]])
}

/// Write a CompactSize integer.
pub fn put_compact_size<B: BufMut>(dst: &mut B, n: u64) {
    match n {
        0..=0xfc => dst.put_u8(n as u8),
        0xfd..=0xffff => {
            dst.put_u8(0xfd);
            dst.put_u16_le(n as u16);
        }
        0x1_0000..=0xffff_ffff => {
            dst.put_u8(0xfe);
            dst.put_u32_le(n as u32);
        }
        _ => {
            dst.put_u8(0xff);
            dst.put_u64_le(n);
        }
    }
}

/// Write a CompactSize-prefixed byte string.
pub fn put_var_bytes<B: BufMut>(dst: &mut B, bytes: &[u8]) {
    put_compact_size(dst, bytes.len() as u64);
    dst.put_slice(bytes);
}

/// Cursor over one message payload, carrying the epoch limits that bound
/// list lengths.
pub struct WireReader<'a> {
    buf: &'a [u8],
    epoch: &'a ProtocolEpoch,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], epoch: &'a ProtocolEpoch) -> Self {
        Self { buf, epoch }
    }

    pub fn epoch(&self) -> &ProtocolEpoch {
        self.epoch
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16_le(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u16_be(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn u32_le(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i32_le(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn u64_le(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn i64_le(&mut self) -> Result<i64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Read a CompactSize integer, rejecting encodings that use more bytes
    /// than the value needs.
    pub fn compact_size(&mut self) -> Result<u64, DecodeError> {
        let (value, min) = match self.u8()? {
            0xff => (self.u64_le()?, 0x1_0000_0000),
            0xfe => (u64::from(self.u32_le()?), 0x1_0000),
            0xfd => (u64::from(self.u16_le()?), 0xfd),
            n => return Ok(u64::from(n)),
        };
        if value < min {
            return Err(DecodeError::NonCanonicalCompactSize);
        }
        Ok(value)
    }

    /// Read a list length bounded by `max`.
    pub fn count(&mut self, max: u64) -> Result<usize, DecodeError> {
        let count = self.compact_size()?;
        if count > max {
            return Err(DecodeError::TooManyEntries { count, max });
        }
        // Every entry takes at least one byte.
        if count > self.remaining() as u64 {
            return Err(DecodeError::Truncated {
                needed: usize::try_from(count).unwrap_or(usize::MAX),
                remaining: self.remaining(),
            });
        }
        Ok(count as usize)
    }

    pub fn var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.compact_size()?;
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        self.need(len)?;
        let out = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(out)
    }

    pub fn var_str(&mut self) -> Result<String, DecodeError> {
        String::from_utf8(self.var_bytes()?).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Read `count` items of `T`. The up-front reservation never exceeds the
    /// bytes left in the payload; beyond that the vector grows as entries
    /// actually decode.
    pub fn list<T: Decodable>(&mut self, count: usize) -> Result<Vec<T>, DecodeError> {
        let fits = self.remaining() / std::mem::size_of::<T>().max(1);
        let mut items = Vec::with_capacity(count.min(fits));
        for _ in 0..count {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    /// Drop whatever is left. Used where later protocol versions append fields.
    pub fn skip_rest(&mut self) {
        self.buf.advance(self.buf.remaining());
    }

    /// Fail unless the payload was consumed exactly.
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
