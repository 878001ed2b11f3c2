//! Configuration types for peerwire-node.
//! Parsed from a TOML file; every field has a default.

use peerwire_protocol::{DialectKind, Network, CURRENT_EPOCH, NODE_NETWORK};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use crate::gateway::GatewaySettings;
use crate::identity::NodeIdentity;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub identity: IdentitySection,
    #[serde(default)]
    pub channel: ChannelSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub dialect: DialectKind,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            network: Network::default(),
            dialect: DialectKind::default(),
            listen_addr: default_listen_addr(),
        }
    }
}

/// Facts announced in the version handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySection {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: i32,
    #[serde(default = "default_services")]
    pub services: u64,
    #[serde(default = "default_local_ip")]
    pub local_ip: IpAddr,
    #[serde(default = "default_port")]
    pub local_port: u16,
    #[serde(default = "default_peer_ip")]
    pub peer_ip: IpAddr,
    #[serde(default = "default_port")]
    pub peer_port: u16,
    /// Fixed handshake nonce. Random per handshake when absent.
    pub nonce: Option<u64>,
    #[serde(default)]
    pub sub_version: String,
    #[serde(default)]
    pub start_height: i32,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            services: default_services(),
            local_ip: default_local_ip(),
            local_port: default_port(),
            peer_ip: default_peer_ip(),
            peer_port: default_port(),
            nonce: None,
            sub_version: String::new(),
            start_height: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSection {
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0:8333".into()
}
fn default_protocol_version() -> i32 {
    CURRENT_EPOCH.protocol_version
}
fn default_services() -> u64 {
    NODE_NETWORK
}
fn default_local_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_peer_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
}
fn default_port() -> u16 {
    8333
}
fn default_inactivity_timeout_secs() -> u64 {
    CURRENT_EPOCH.inactivity_timeout_secs
}

impl NodeConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.channel.inactivity_timeout_secs)
    }

    /// Everything the gateway needs to build channels.
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            identity: NodeIdentity::from_config(&self.identity),
            dialect: self.network.dialect.build(self.network.network),
            inactivity_timeout: self.inactivity_timeout(),
        }
    }
}
