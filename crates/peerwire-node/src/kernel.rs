//! Kernel -- the sink that consumes decoded messages.
//!
//! A channel hands every decoded message to the kernel together with its
//! [`ChannelId`]. The answer is binary: `false` means the peer is dropped.

use peerwire_protocol::Message;
use tokio::sync::mpsc;

use crate::channel::ChannelId;

/// Message sink shared by every channel of a gateway.
pub trait Kernel: Send + Sync {
    /// Accept or reject `message` from `channel`. Rejection disconnects.
    fn deliver(&self, channel: ChannelId, message: Message) -> bool;
}

impl<F> Kernel for F
where
    F: Fn(ChannelId, Message) -> bool + Send + Sync,
{
    fn deliver(&self, channel: ChannelId, message: Message) -> bool {
        self(channel, message)
    }
}

/// One accepted message, as queued by [`QueueKernel`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub channel: ChannelId,
    pub message: Message,
}

/// Kernel that forwards into a bounded queue for a consumer task.
///
/// A full or closed queue counts as rejection.
#[derive(Debug, Clone)]
pub struct QueueKernel {
    tx: mpsc::Sender<Delivery>,
}

impl QueueKernel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Kernel for QueueKernel {
    fn deliver(&self, channel: ChannelId, message: Message) -> bool {
        match self.tx.try_send(Delivery { channel, message }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(d)) => {
                tracing::warn!(channel = %d.channel, command = %d.message.command_string(), "kernel queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(%channel, "kernel queue closed");
                false
            }
        }
    }
}
