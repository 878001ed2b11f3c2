//! Protocol epochs -- versioned parameter sets for the wire protocol.
//!
//! An epoch defines the protocol-level limits and timing that peers must
//! agree on. Which header layout applies within an epoch is a dialect
//! decision (see [`crate::dialect`]), not part of the epoch itself.
//!
//! Only the genesis epoch exists today.

/// A protocol epoch: a named, versioned set of wire limits and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolEpoch {
    /// Epoch identifier. Monotonically increasing.
    pub id: u16,
    /// Protocol version announced in the handshake.
    pub protocol_version: i32,

    // -- Liveness --
    /// Seconds without a completed read before a channel is torn down.
    pub inactivity_timeout_secs: u64,

    // -- Wire limits --
    /// Largest payload length a header may declare.
    pub max_payload_bytes: u32,
    /// Maximum entries in one inv or getdata message.
    pub max_inventory_entries: u64,
    /// Maximum entries in one addr message.
    pub max_addr_entries: u64,
    /// Maximum hashes in a getblocks locator.
    pub max_locator_hashes: u64,
}

/// Genesis epoch.
///
/// Protocol 31900 limits: 90 minute inactivity window and the 32 MiB
/// payload ceiling.
pub const GENESIS_EPOCH: ProtocolEpoch = ProtocolEpoch {
    id: 0,
    protocol_version: 31900,

    inactivity_timeout_secs: 90 * 60,

    max_payload_bytes: 32 * 1024 * 1024,
    max_inventory_entries: 50_000,
    max_addr_entries: 1_000,
    max_locator_hashes: 500,
};

/// The active epoch.
pub const CURRENT_EPOCH: &ProtocolEpoch = &GENESIS_EPOCH;
