//! Node identity -- the facts a handshake announces about this node.

use std::net::SocketAddr;

use peerwire_protocol::{NetAddress, Version};

use crate::config::IdentitySection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub protocol_version: i32,
    pub services: u64,
    pub local_addr: SocketAddr,
    /// Address announced as the receiver of our version message.
    pub peer_addr: SocketAddr,
    /// Fixed nonce, or `None` for a fresh random one per handshake.
    pub nonce: Option<u64>,
    pub sub_version: String,
    pub start_height: i32,
}

impl NodeIdentity {
    pub fn from_config(cfg: &IdentitySection) -> Self {
        Self {
            protocol_version: cfg.protocol_version,
            services: cfg.services,
            local_addr: SocketAddr::new(cfg.local_ip, cfg.local_port),
            peer_addr: SocketAddr::new(cfg.peer_ip, cfg.peer_port),
            nonce: cfg.nonce,
            sub_version: cfg.sub_version.clone(),
            start_height: cfg.start_height,
        }
    }

    /// Build the version message sent at `timestamp` (unix seconds).
    pub fn version_message(&self, timestamp: i64) -> Version {
        Version {
            version: self.protocol_version,
            services: self.services,
            timestamp,
            receiver: NetAddress::new(self.services, self.peer_addr),
            sender: NetAddress::new(self.services, self.local_addr),
            nonce: self.nonce.unwrap_or_else(rand::random),
            sub_version: self.sub_version.clone(),
            start_height: self.start_height,
        }
    }

    /// Version message stamped with the current time.
    pub fn handshake(&self) -> Version {
        self.version_message(chrono::Utc::now().timestamp())
    }
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self::from_config(&IdentitySection::default())
    }
}
