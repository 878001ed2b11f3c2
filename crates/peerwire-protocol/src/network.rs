//! Network selection and the magic bytes that open every header.

use serde::{Deserialize, Serialize};

/// Which chain a node talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet3,
    Regtest,
}

impl Network {
    /// Magic as read from the wire with `u32::from_le_bytes`.
    pub const fn magic(self) -> u32 {
        match self {
            Network::Mainnet => 0xD9B4_BEF9,
            Network::Testnet3 => 0x0709_110B,
            Network::Regtest => 0xDAB5_BFFA,
        }
    }

    /// Magic in wire byte order.
    pub const fn magic_bytes(self) -> [u8; 4] {
        self.magic().to_le_bytes()
    }

    pub fn name(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet3 => "testnet3",
            Network::Regtest => "regtest",
        }
    }
}
