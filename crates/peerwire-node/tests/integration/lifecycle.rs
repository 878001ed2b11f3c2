//! Channel lifecycle through the gateway: handshake, outbound sends,
//! identity allocation, teardown idempotency and shutdown.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use peerwire_node::{DisconnectReason, Gateway, GatewayEvent, NodeConfig, QueueKernel};
use peerwire_protocol::{GetAddr, GetBlocks, Hash256, Message, Verack};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use crate::harness::{frame, read_message, RecordingKernel, TestGateway};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_handshake_carries_configured_identity() {
    let mut node = TestGateway::start(RecordingKernel::accepting(), Duration::from_secs(60));
    let (_, _peer, handshake) = node.attach_peer().await.unwrap();

    let Message::Version(v) = handshake else {
        panic!("first frame was not a version message: {handshake:?}");
    };
    let identity = node.gateway.local_identity();
    assert_eq!(v.version, identity.protocol_version);
    assert_eq!(v.services, identity.services);
    assert_eq!(v.nonce, 0x5eed);
    assert_eq!(v.receiver.socket_addr(), SocketAddr::from((Ipv4Addr::new(10, 0, 0, 1), 8333)));
    assert_eq!(v.sender.socket_addr(), identity.local_addr);
    assert!(v.timestamp > 1_600_000_000);

    node.shutdown().await;
}

#[tokio::test]
async fn test_outbound_messages_are_written_in_order() {
    let mut node = TestGateway::start(RecordingKernel::accepting(), Duration::from_secs(60));
    let (id, mut peer, _) = node.attach_peer().await.unwrap();

    let getblocks = Message::GetBlocks(GetBlocks {
        version: 31900,
        locator: vec![Hash256([7u8; 32]), Hash256::ZERO],
        hash_stop: Hash256::ZERO,
    });
    assert!(node.gateway.send(id, Message::Verack(Verack)).await);
    assert!(node.gateway.send(id, getblocks.clone()).await);
    assert!(node.gateway.send(id, Message::GetAddr(GetAddr)).await);

    assert_eq!(read_message(&mut peer).await.unwrap(), Message::Verack(Verack));
    assert_eq!(read_message(&mut peer).await.unwrap(), getblocks);
    assert_eq!(read_message(&mut peer).await.unwrap(), Message::GetAddr(GetAddr));

    node.shutdown().await;
}

#[tokio::test]
async fn test_channel_ids_never_reused() {
    let mut node = TestGateway::start(RecordingKernel::accepting(), Duration::from_secs(60));
    let mut seen = HashSet::new();

    for _ in 0..5 {
        let (id, peer, _) = node.attach_peer().await.unwrap();
        assert!(seen.insert(id), "id {id} handed out twice");
        drop(peer);
        let reason = node.wait_closed(id, WAIT).await.unwrap();
        assert!(matches!(reason, DisconnectReason::Io(_)));
    }
    assert!(node.gateway.live_channels().await.is_empty());

    node.shutdown().await;
}

#[tokio::test]
async fn test_racing_teardowns_close_once() {
    let mut node = TestGateway::start(RecordingKernel::accepting(), Duration::from_secs(60));
    let (id, peer, _) = node.attach_peer().await.unwrap();

    // A peer reset and an external request race for the same channel.
    node.gateway
        .request_teardown(id, DisconnectReason::Timeout(Duration::from_secs(60)));
    drop(peer);
    node.gateway.request_teardown(id, DisconnectReason::Shutdown);

    node.wait_closed(id, WAIT).await.unwrap();
    assert!(node.quiet_for(Duration::from_millis(200)).await);
    assert!(!node.gateway.send(id, Message::Verack(Verack)).await);

    node.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_live_channels() {
    let kernel = RecordingKernel::accepting();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (gateway, task) = Gateway::spawn(
        crate::harness::test_settings(Duration::from_secs(60)),
        kernel,
        shutdown_rx,
    );
    let mut events = gateway.subscribe();

    let mut peers = Vec::new();
    for _ in 0..3 {
        let (local, remote) = tokio::io::duplex(4096);
        gateway.attach(local, None).await.unwrap();
        peers.push(remote);
    }

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();

    let mut closed = 0;
    while let Ok(event) = events.try_recv() {
        if let GatewayEvent::ChannelClosed { reason, .. } = event {
            assert_eq!(reason, DisconnectReason::Shutdown);
            closed += 1;
        }
    }
    assert_eq!(closed, 3);
    assert!(gateway.live_channels().await.is_empty());
}

#[tokio::test]
async fn test_queue_kernel_feeds_consumer() {
    let (kernel, mut deliveries) = QueueKernel::new(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let settings = NodeConfig::default().gateway_settings();
    let (gateway, _task) = Gateway::spawn(settings, Arc::new(kernel), shutdown_rx);

    let (local, mut remote) = tokio::io::duplex(4096);
    let id = gateway.attach(local, None).await.unwrap();
    read_message(&mut remote).await.unwrap();
    remote.write_all(&frame(&Message::GetAddr(GetAddr))).await.unwrap();

    let delivery = tokio::time::timeout(WAIT, deliveries.recv()).await.unwrap().unwrap();
    assert_eq!(delivery.channel, id);
    assert_eq!(delivery.message, Message::GetAddr(GetAddr));

    let _ = shutdown_tx.send(());
}
