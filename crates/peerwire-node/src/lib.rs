//! Peerwire Node -- per-connection protocol engine.
//!
//! A [`gateway::Gateway`] owns the live channels. Each [`channel::Channel`]
//! frames bytes off its socket through a dialect, hands decoded messages to
//! the [`kernel::Kernel`], sends the handshake and serializes outbound
//! messages. An [`timeout::InactivityTimer`] per channel tears down peers
//! that go quiet.

pub mod channel;
pub mod config;
pub mod gateway;
pub mod identity;
pub mod kernel;
pub mod timeout;

pub use channel::{Channel, ChannelContext, ChannelHandle, ChannelId, DisconnectReason, OUTBOUND_QUEUE_CAPACITY};
pub use config::NodeConfig;
pub use gateway::{Gateway, GatewayError, GatewayEvent, GatewaySettings, Teardown, TeardownHandle};
pub use identity::NodeIdentity;
pub use kernel::{Delivery, Kernel, QueueKernel};
pub use timeout::InactivityTimer;

/// Install the fmt subscriber, filtered by `RUST_LOG` or `default_filter`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init();
}
