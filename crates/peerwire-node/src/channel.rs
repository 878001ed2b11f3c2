//! Channel -- the per-connection protocol engine.
//!
//! One task per connection. It writes the handshake, then runs the read
//! state machine and the outbound writer side by side:
//!
//! ```text
//! AwaitHeader -> [AwaitChecksum] -> AwaitPayload -> Dispatch -> AwaitHeader
//! ```
//!
//! Reads are strictly sequential and only the reader touches the header,
//! checksum and payload buffers. Every completed read rearms the inactivity
//! timer before the next read is issued. Any failure ends the task with one
//! teardown request to the gateway; cancellation ends it silently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use peerwire_protocol::{
    CommandString, DecodeError, Dialect, Header, Message, CHECKSUM_SIZE, HEADER_CHUNK_SIZE,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::gateway::TeardownHandle;
use crate::kernel::Kernel;
use crate::timeout::InactivityTimer;

/// Outbound messages a channel buffers before `send` starts refusing.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Process-unique channel identity. Allocated by the gateway, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Why a channel asked to be torn down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectReason {
    #[error("i/o error: {0}")]
    Io(String),
    #[error("invalid header: {0:?}")]
    BadHeader(Header),
    #[error("checksum mismatch on {command}")]
    BadChecksum { command: CommandString },
    #[error("cannot decode {command}: {source}")]
    Decode {
        command: CommandString,
        source: DecodeError,
    },
    #[error("kernel rejected {command}")]
    Rejected { command: CommandString },
    #[error("no traffic for {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("gateway shutting down")]
    Shutdown,
}

impl DisconnectReason {
    fn io(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            DisconnectReason::Io("connection closed by peer".into())
        } else {
            DisconnectReason::Io(e.to_string())
        }
    }
}

/// Collaborators a channel is built with.
#[derive(Clone)]
pub struct ChannelContext {
    pub dialect: Arc<dyn Dialect>,
    pub kernel: Arc<dyn Kernel>,
    pub teardown: TeardownHandle,
    pub inactivity_timeout: Duration,
}

/// Cheap handle for queueing outbound messages and cancelling the channel.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queue a message for the writer. Returns false when the queue is full
    /// or the channel is gone; the write outcome itself is never reported back.
    pub fn send(&self, message: Message) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(m)) => {
                tracing::warn!(channel = %self.id, command = %m.command_string(), "outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop the channel without a teardown request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

}

/// Read-side progress between two completed reads.
#[derive(Debug)]
enum Stage {
    AwaitHeader,
    AwaitChecksum(Header),
    AwaitPayload(Header),
    Dispatch(Header, Vec<u8>),
}

pub struct Channel {
    id: ChannelId,
    ctx: ChannelContext,
    cancel: CancellationToken,
}

impl Channel {
    /// Start a channel over `stream`. `handshake` is written before anything
    /// else; reading starts once it is on the wire.
    pub fn spawn<S>(
        id: ChannelId,
        stream: S,
        ctx: ChannelContext,
        handshake: Message,
        cancel: CancellationToken,
    ) -> (ChannelHandle, JoinHandle<()>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = ChannelHandle {
            id,
            outbound: tx,
            cancel: cancel.clone(),
        };
        let channel = Channel { id, ctx, cancel };
        let task = tokio::spawn(channel.run(stream, handshake, rx));
        (handle, task)
    }

    async fn run<S>(self, stream: S, handshake: Message, outbound: mpsc::Receiver<Message>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let timer = InactivityTimer::start(
            self.id,
            self.ctx.inactivity_timeout,
            self.ctx.teardown.clone(),
            &self.cancel,
        );
        let (mut rd, mut wr) = tokio::io::split(stream);

        tracing::debug!(channel = %self.id, dialect = self.ctx.dialect.name(), "channel started");

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            reason = self.serve(&mut rd, &mut wr, handshake, outbound, &timer) => Some(reason),
        };

        timer.cancel();
        match outcome {
            Some(reason) => {
                tracing::info!(channel = %self.id, %reason, "channel failed");
                self.ctx.teardown.request(self.id, reason);
            }
            None => tracing::debug!(channel = %self.id, "channel cancelled"),
        }
    }

    /// Runs until the first failure and returns it.
    async fn serve<R, W>(
        &self,
        rd: &mut R,
        wr: &mut W,
        handshake: Message,
        outbound: mpsc::Receiver<Message>,
        timer: &InactivityTimer,
    ) -> DisconnectReason
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if let Err(reason) = self.write_message(wr, &handshake).await {
            return reason;
        }
        tokio::select! {
            reason = self.read_loop(rd, timer) => reason,
            reason = self.write_loop(wr, outbound) => reason,
        }
    }

    async fn read_loop<R>(&self, rd: &mut R, timer: &InactivityTimer) -> DisconnectReason
    where
        R: AsyncRead + Unpin,
    {
        let mut stage = Stage::AwaitHeader;
        loop {
            stage = match self.advance(rd, stage, timer).await {
                Ok(next) => next,
                Err(reason) => return reason,
            };
        }
    }

    /// Complete one stage. The timer is rearmed as soon as a read finishes.
    async fn advance<R>(
        &self,
        rd: &mut R,
        stage: Stage,
        timer: &InactivityTimer,
    ) -> Result<Stage, DisconnectReason>
    where
        R: AsyncRead + Unpin,
    {
        let dialect = &self.ctx.dialect;
        match stage {
            Stage::AwaitHeader => {
                let mut chunk = [0u8; HEADER_CHUNK_SIZE];
                rd.read_exact(&mut chunk).await.map_err(DisconnectReason::io)?;
                let header = dialect.parse_header(&chunk);
                if !dialect.validate_header(&header) {
                    return Err(DisconnectReason::BadHeader(header));
                }
                timer.arm();
                if dialect.requires_checksum(&header) {
                    Ok(Stage::AwaitChecksum(header))
                } else {
                    Ok(Stage::AwaitPayload(header))
                }
            }
            Stage::AwaitChecksum(mut header) => {
                let mut bytes = [0u8; CHECKSUM_SIZE];
                rd.read_exact(&mut bytes).await.map_err(DisconnectReason::io)?;
                header.checksum = Some(dialect.parse_checksum(&bytes));
                timer.arm();
                Ok(Stage::AwaitPayload(header))
            }
            Stage::AwaitPayload(header) => {
                let mut payload = vec![0u8; header.payload_length as usize];
                rd.read_exact(&mut payload).await.map_err(DisconnectReason::io)?;
                timer.arm();
                if !dialect.verify_checksum(&header, &payload) {
                    return Err(DisconnectReason::BadChecksum {
                        command: header.command,
                    });
                }
                Ok(Stage::Dispatch(header, payload))
            }
            Stage::Dispatch(header, payload) => {
                let message = dialect
                    .decode_body(&header, &payload)
                    .map_err(|source| DisconnectReason::Decode {
                        command: header.command,
                        source,
                    })?;
                if let Message::Unknown { command } = message {
                    tracing::debug!(channel = %self.id, %command, bytes = payload.len(), "ignoring unknown command");
                    return Ok(Stage::AwaitHeader);
                }
                tracing::trace!(channel = %self.id, command = %header.command, "dispatching");
                if !self.ctx.kernel.deliver(self.id, message) {
                    return Err(DisconnectReason::Rejected {
                        command: header.command,
                    });
                }
                Ok(Stage::AwaitHeader)
            }
        }
    }

    async fn write_loop<W>(
        &self,
        wr: &mut W,
        mut outbound: mpsc::Receiver<Message>,
    ) -> DisconnectReason
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(message) = outbound.recv().await {
            if let Err(reason) = self.write_message(wr, &message).await {
                return reason;
            }
        }
        // Every handle is gone; keep reading until cancelled or failed.
        std::future::pending().await
    }

    /// Encode and write one message. Messages the dialect refuses to encode
    /// are dropped with a warning; only transport failures are fatal.
    async fn write_message<W>(&self, wr: &mut W, message: &Message) -> Result<(), DisconnectReason>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = match self.ctx.dialect.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel = %self.id, command = %message.command_string(), "dropping outbound message: {e}");
                return Ok(());
            }
        };
        wr.write_all(&frame)
            .await
            .map_err(|e| DisconnectReason::WriteFailed(e.to_string()))?;
        wr.flush()
            .await
            .map_err(|e| DisconnectReason::WriteFailed(e.to_string()))?;
        tracing::trace!(channel = %self.id, command = %message.command_string(), bytes = frame.len(), "sent");
        Ok(())
    }
}
