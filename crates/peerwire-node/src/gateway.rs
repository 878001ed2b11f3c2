//! Gateway -- owner of the live channel set.
//!
//! The gateway allocates channel ids, spawns a [`Channel`] per socket and is
//! the only place a channel is removed. Channels ask for removal by sending a
//! [`Teardown`] over an unbounded queue; a single loop drains it, cancels the
//! channel, waits for its task to unwind and announces the closure.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peerwire_protocol::{Dialect, Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelContext, ChannelHandle, ChannelId, DisconnectReason};
use crate::identity::NodeIdentity;
use crate::kernel::Kernel;

const EVENT_CAPACITY: usize = 256;

/// What every channel of one gateway shares.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub identity: NodeIdentity,
    pub dialect: Arc<dyn Dialect>,
    pub inactivity_timeout: Duration,
}

/// A request to remove one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teardown {
    pub id: ChannelId,
    pub reason: DisconnectReason,
}

/// Sending side of the teardown queue. Requests are fire-and-forget and may
/// repeat for the same channel.
#[derive(Debug, Clone)]
pub struct TeardownHandle {
    tx: mpsc::UnboundedSender<Teardown>,
}

impl TeardownHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Teardown>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn request(&self, id: ChannelId, reason: DisconnectReason) {
        if self.tx.send(Teardown { id, reason }).is_err() {
            tracing::debug!(channel = %id, "teardown requested after gateway stopped");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    ChannelOpened {
        id: ChannelId,
        remote: Option<SocketAddr>,
    },
    ChannelClosed {
        id: ChannelId,
        reason: DisconnectReason,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway is shutting down")]
    ShuttingDown,
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),
}

struct LiveChannel {
    handle: ChannelHandle,
    remote: Option<SocketAddr>,
    task: JoinHandle<()>,
}

pub struct Gateway {
    settings: GatewaySettings,
    kernel: Arc<dyn Kernel>,
    channels: RwLock<HashMap<ChannelId, LiveChannel>>,
    next_id: AtomicU64,
    teardown: TeardownHandle,
    events: broadcast::Sender<GatewayEvent>,
    root: CancellationToken,
}

impl Gateway {
    /// Build a gateway and start its teardown loop. The loop runs until
    /// `shutdown` fires, then cancels every live channel.
    pub fn spawn(
        settings: GatewaySettings,
        kernel: Arc<dyn Kernel>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (teardown, rx) = TeardownHandle::channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let gateway = Arc::new(Self {
            settings,
            kernel,
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            teardown,
            events,
            root: CancellationToken::new(),
        });
        let task = tokio::spawn(gateway.clone().run_teardown_loop(rx, shutdown));
        (gateway, task)
    }

    /// Register a connected stream as a new channel. The id is allocated
    /// before the channel does any I/O.
    pub async fn attach<S>(&self, stream: S, remote: Option<SocketAddr>) -> Result<ChannelId, GatewayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = ChannelId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let ctx = ChannelContext {
            dialect: self.settings.dialect.clone(),
            kernel: self.kernel.clone(),
            teardown: self.teardown.clone(),
            inactivity_timeout: self.settings.inactivity_timeout,
        };
        let handshake = Message::Version(self.settings.identity.handshake());

        // Registered before the teardown loop can see a request for it. The
        // shutdown check happens under the lock so a drain cannot miss us.
        let mut channels = self.channels.write().await;
        if self.root.is_cancelled() {
            return Err(GatewayError::ShuttingDown);
        }
        let (handle, task) = Channel::spawn(id, stream, ctx, handshake, self.root.child_token());
        channels.insert(
            id,
            LiveChannel {
                handle,
                remote,
                task,
            },
        );
        let live = channels.len();
        drop(channels);

        tracing::info!(channel = %id, remote = ?remote, live, "channel attached");
        let _ = self.events.send(GatewayEvent::ChannelOpened { id, remote });
        Ok(id)
    }

    /// Dial a peer and attach the connection.
    pub async fn connect<A: ToSocketAddrs>(&self, addr: A) -> Result<ChannelId, GatewayError> {
        let stream = TcpStream::connect(addr).await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed: {e}");
        }
        let remote = stream.peer_addr().ok();
        self.attach(stream, remote).await
    }

    /// Accept loop. Every inbound socket becomes a channel.
    pub async fn listen(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "listening");
        }
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tracing::debug!(%remote, "accepted inbound connection");
                        if let Err(e) = self.attach(stream, Some(remote)).await {
                            tracing::warn!(%remote, "dropping inbound connection: {e}");
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("failed to accept connection: {e}"),
                },
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signal, stopping accept loop");
                    break;
                }
            }
        }
    }

    /// Queue `message` on channel `id`. False if the channel is not live or
    /// its outbound queue is full.
    pub async fn send(&self, id: ChannelId, message: Message) -> bool {
        match self.channels.read().await.get(&id) {
            Some(live) => live.handle.send(message),
            None => false,
        }
    }

    pub fn request_teardown(&self, id: ChannelId, reason: DisconnectReason) {
        self.teardown.request(id, reason);
    }

    pub async fn live_channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.channels.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn is_live(&self, id: ChannelId) -> bool {
        self.channels.read().await.contains_key(&id)
    }

    pub fn local_identity(&self) -> &NodeIdentity {
        &self.settings.identity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Remove one channel. Unknown ids are ignored, so repeated requests for
    /// the same channel close it once.
    async fn remove(&self, id: ChannelId, reason: DisconnectReason) -> bool {
        let Some(live) = self.channels.write().await.remove(&id) else {
            tracing::trace!(channel = %id, %reason, "duplicate teardown ignored");
            return false;
        };
        self.finish(id, live, reason).await;
        true
    }

    async fn finish(&self, id: ChannelId, live: LiveChannel, reason: DisconnectReason) {
        live.handle.cancel();
        if let Err(e) = live.task.await {
            tracing::warn!(channel = %id, "channel task ended abnormally: {e}");
        }
        tracing::info!(channel = %id, remote = ?live.remote, %reason, "channel closed");
        let _ = self.events.send(GatewayEvent::ChannelClosed { id, reason });
    }

    async fn close_all(&self) {
        self.root.cancel();
        let drained: Vec<(ChannelId, LiveChannel)> = self.channels.write().await.drain().collect();
        for (id, live) in drained {
            self.finish(id, live, DisconnectReason::Shutdown).await;
        }
    }

    async fn run_teardown_loop(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<Teardown>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    let live = self.channels.read().await.len();
                    tracing::info!(live, "gateway: shutting down");
                    self.close_all().await;
                    break;
                }
                request = requests.recv() => match request {
                    Some(Teardown { id, reason }) => {
                        self.remove(id, reason).await;
                    }
                    None => break,
                },
            }
        }
    }
}
