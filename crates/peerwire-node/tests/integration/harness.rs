//! Test harness for in-process peerwire-node integration tests.
//!
//! Provides RecordingKernel (captures deliveries, optionally rejects),
//! TestGateway (gateway plus its shutdown and event plumbing) and helpers to
//! build and read wire frames from the remote end of a channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerwire_node::{ChannelId, DisconnectReason, Gateway, GatewayEvent, GatewaySettings, Kernel, NodeConfig};
use peerwire_protocol::{
    payload_checksum, CommandString, Dialect, Header, Message, Network, OriginalDialect,
    CHECKSUM_SIZE, HEADER_CHUNK_SIZE,
};
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream};
use tokio::sync::broadcast;

/// Kernel that records every delivery. Messages matching `reject` are
/// recorded and then refused.
pub struct RecordingKernel {
    seen: Mutex<Vec<(ChannelId, Message)>>,
    reject: Box<dyn Fn(&Message) -> bool + Send + Sync>,
}

#[allow(dead_code)]
impl RecordingKernel {
    pub fn accepting() -> Arc<Self> {
        Self::rejecting(|_| false)
    }

    pub fn rejecting(reject: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            reject: Box::new(reject),
        })
    }

    pub fn messages(&self) -> Vec<(ChannelId, Message)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Wait until at least `n` messages were delivered.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.count() < n {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("timeout waiting for {} deliveries (have {})", n, self.count());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }
}

impl Kernel for RecordingKernel {
    fn deliver(&self, channel: ChannelId, message: Message) -> bool {
        let reject = (self.reject)(&message);
        self.seen.lock().unwrap().push((channel, message));
        !reject
    }
}

/// Settings used by most tests: mainnet, original dialect.
pub fn test_settings(inactivity: Duration) -> GatewaySettings {
    let mut cfg = NodeConfig::default();
    cfg.identity.nonce = Some(0x5eed);
    cfg.channel.inactivity_timeout_secs = inactivity.as_secs();
    cfg.gateway_settings()
}

pub fn dialect() -> OriginalDialect {
    OriginalDialect::new(Network::Mainnet)
}

/// Encode a known message the way the node's dialect does.
pub fn frame(message: &Message) -> Vec<u8> {
    dialect().encode(message).unwrap().to_vec()
}

/// Frame any command name with a correct checksum.
pub fn raw_frame(command: &str, payload: &[u8]) -> Vec<u8> {
    let header = Header {
        magic: Network::Mainnet.magic(),
        command: CommandString::new(command).unwrap(),
        payload_length: payload.len() as u32,
        checksum: Some(payload_checksum(payload)),
    };
    let mut out = Vec::new();
    header.encode(&mut out);
    out.extend_from_slice(payload);
    out
}

/// Read one full message from the remote end of a channel.
pub async fn read_message<R: AsyncRead + Unpin>(io: &mut R) -> anyhow::Result<Message> {
    let dialect = dialect();
    let mut chunk = [0u8; HEADER_CHUNK_SIZE];
    io.read_exact(&mut chunk).await?;
    let mut header = dialect.parse_header(&chunk);
    anyhow::ensure!(dialect.validate_header(&header), "invalid header {header:?}");
    if dialect.requires_checksum(&header) {
        let mut bytes = [0u8; CHECKSUM_SIZE];
        io.read_exact(&mut bytes).await?;
        header.checksum = Some(dialect.parse_checksum(&bytes));
    }
    let mut payload = vec![0u8; header.payload_length as usize];
    io.read_exact(&mut payload).await?;
    anyhow::ensure!(dialect.verify_checksum(&header, &payload), "bad checksum");
    Ok(dialect.decode_body(&header, &payload)?)
}

/// A gateway running in the test runtime.
pub struct TestGateway {
    pub gateway: Arc<Gateway>,
    pub kernel: Arc<RecordingKernel>,
    pub events: broadcast::Receiver<GatewayEvent>,
    shutdown_tx: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl TestGateway {
    pub fn start(kernel: Arc<RecordingKernel>, inactivity: Duration) -> Self {
        Self::with_settings(kernel, test_settings(inactivity))
    }

    pub fn with_settings(kernel: Arc<RecordingKernel>, settings: GatewaySettings) -> Self {
        peerwire_node::init_tracing("peerwire_node=debug");
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (gateway, task) = Gateway::spawn(settings, kernel.clone(), shutdown_rx);
        let events = gateway.subscribe();
        Self {
            gateway,
            kernel,
            events,
            shutdown_tx,
            task,
        }
    }

    /// Attach an in-memory connection. Returns the channel id and the
    /// remote end, with the handshake already read off it.
    pub async fn attach_peer(&mut self) -> anyhow::Result<(ChannelId, DuplexStream, Message)> {
        let (local, mut remote) = tokio::io::duplex(64 * 1024);
        let id = self.gateway.attach(local, None).await?;
        match self.next_event(Duration::from_secs(5)).await? {
            GatewayEvent::ChannelOpened { id: opened, .. } if opened == id => {}
            other => anyhow::bail!("expected ChannelOpened for {id}, got {other:?}"),
        }
        let handshake = read_message(&mut remote).await?;
        Ok((id, remote, handshake))
    }

    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub async fn next_event(&mut self, timeout: Duration) -> anyhow::Result<GatewayEvent> {
        Ok(tokio::time::timeout(timeout, self.events.recv()).await??)
    }

    /// Wait for `id` to close and return why.
    pub async fn wait_closed(&mut self, id: ChannelId, timeout: Duration) -> anyhow::Result<DisconnectReason> {
        loop {
            match self.next_event(timeout).await? {
                GatewayEvent::ChannelClosed { id: closed, reason } if closed == id => return Ok(reason),
                _ => continue,
            }
        }
    }

    /// True when no event arrives within `window`.
    pub async fn quiet_for(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.events.recv()).await.is_err()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}
