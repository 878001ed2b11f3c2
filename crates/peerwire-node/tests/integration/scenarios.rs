//! End-to-end read-path scenarios: handshake frame, unknown command drain,
//! kernel rejection, silence.

use std::time::Duration;

use peerwire_node::DisconnectReason;
use peerwire_protocol::{
    Block, BlockHeader, CommandString, Hash256, Message, Transaction, TxIn, TxOut, OutPoint,
    Verack, HEADER_CHUNK_SIZE,
};
use tokio::io::AsyncWriteExt;

use crate::harness::{frame, raw_frame, RecordingKernel, TestGateway};

const WAIT: Duration = Duration::from_secs(5);

fn genesis_like_block() -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_block: Hash256::ZERO,
            merkle_root: Hash256([0x3b; 32]),
            time: 1_231_006_505,
            bits: 0x1d00_ffff,
            nonce: 2_083_236_893,
        },
        transactions: vec![Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint {
                    hash: Hash256::ZERO,
                    index: u32::MAX,
                },
                script_sig: b"The Times 03/Jan/2009".to_vec(),
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: 50 * 100_000_000,
                script_pubkey: vec![0x41; 67],
            }],
            lock_time: 0,
        }],
    }
}

/// verack: 20-byte header, no checksum, empty payload, straight to dispatch.
#[tokio::test]
async fn test_verack_without_checksum_is_delivered() {
    let mut node = TestGateway::start(RecordingKernel::accepting(), Duration::from_secs(60));
    let (id, mut peer, _) = node.attach_peer().await.unwrap();

    let bytes = frame(&Message::Verack(Verack));
    assert_eq!(bytes.len(), HEADER_CHUNK_SIZE);
    peer.write_all(&bytes).await.unwrap();

    node.kernel.wait_for(1, WAIT).await.unwrap();
    assert_eq!(node.kernel.messages(), vec![(id, Message::Verack(Verack))]);
    assert!(node.gateway.is_live(id).await);

    node.shutdown().await;
}

/// Unknown command with a 50-byte payload: drained, not delivered, channel
/// keeps reading.
#[tokio::test]
async fn test_unknown_command_drained_and_loop_continues() {
    let mut node = TestGateway::start(RecordingKernel::accepting(), Duration::from_secs(60));
    let (id, mut peer, _) = node.attach_peer().await.unwrap();

    peer.write_all(&raw_frame("feefilter", &[0x11; 50])).await.unwrap();
    peer.write_all(&frame(&Message::Verack(Verack))).await.unwrap();

    node.kernel.wait_for(1, WAIT).await.unwrap();
    assert_eq!(node.kernel.messages(), vec![(id, Message::Verack(Verack))]);
    assert!(node.quiet_for(Duration::from_millis(100)).await);
    assert!(node.gateway.is_live(id).await);

    node.shutdown().await;
}

/// Kernel rejects a block: exactly one teardown, nothing further is read.
#[tokio::test]
async fn test_rejected_block_disconnects() {
    let kernel = RecordingKernel::rejecting(|m| matches!(m, Message::Block(_)));
    let mut node = TestGateway::start(kernel, Duration::from_secs(60));
    let (id, mut peer, _) = node.attach_peer().await.unwrap();

    peer.write_all(&frame(&Message::Block(genesis_like_block()))).await.unwrap();
    // Queued behind the block; must never reach the kernel.
    let _ = peer.write_all(&frame(&Message::Verack(Verack))).await;

    let reason = node.wait_closed(id, WAIT).await.unwrap();
    assert_eq!(
        reason,
        DisconnectReason::Rejected {
            command: CommandString::new("block").unwrap()
        }
    );
    assert_eq!(node.kernel.count(), 1);
    assert!(node.quiet_for(Duration::from_millis(100)).await);
    assert!(!node.gateway.is_live(id).await);

    node.shutdown().await;
}

/// Silence longer than the inactivity window closes the channel as a timeout.
#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out() {
    let timeout = Duration::from_secs(90 * 60);
    let mut node = TestGateway::start(RecordingKernel::accepting(), timeout);
    let (id, _peer, _) = node.attach_peer().await.unwrap();

    let reason = node.wait_closed(id, timeout * 2).await.unwrap();
    assert_eq!(reason, DisconnectReason::Timeout(timeout));
    assert!(node.quiet_for(timeout).await);
    assert!(node.gateway.live_channels().await.is_empty());

    node.shutdown().await;
}

/// Traffic inside the window keeps pushing the deadline out.
#[tokio::test(start_paused = true)]
async fn test_traffic_rearms_timeout() {
    let timeout = Duration::from_secs(10);
    let mut node = TestGateway::start(RecordingKernel::accepting(), timeout);
    let (id, mut peer, _) = node.attach_peer().await.unwrap();

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(7)).await;
        peer.write_all(&frame(&Message::Verack(Verack))).await.unwrap();
    }
    node.kernel.wait_for(6, WAIT).await.unwrap();
    assert!(node.gateway.is_live(id).await);

    let started = tokio::time::Instant::now();
    let reason = node.wait_closed(id, timeout * 2).await.unwrap();
    assert_eq!(reason, DisconnectReason::Timeout(timeout));
    assert!(started.elapsed() >= timeout - Duration::from_secs(1));

    node.shutdown().await;
}

#[tokio::test]
async fn test_wrong_magic_disconnects() {
    let mut node = TestGateway::start(RecordingKernel::accepting(), Duration::from_secs(60));
    let (id, mut peer, _) = node.attach_peer().await.unwrap();

    let mut bytes = frame(&Message::Verack(Verack));
    bytes[..4].copy_from_slice(&[0x0b, 0x11, 0x09, 0x07]);
    peer.write_all(&bytes).await.unwrap();

    let reason = node.wait_closed(id, WAIT).await.unwrap();
    assert!(matches!(reason, DisconnectReason::BadHeader(h) if h.magic == 0x0709_110b));
    assert_eq!(node.kernel.count(), 0);

    node.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_payload_disconnects() {
    let mut node = TestGateway::start(RecordingKernel::accepting(), Duration::from_secs(60));
    let (id, mut peer, _) = node.attach_peer().await.unwrap();

    let mut bytes = frame(&Message::Block(genesis_like_block()));
    let last = bytes.len() - 1;
    bytes[last] ^= 0x80;
    peer.write_all(&bytes).await.unwrap();

    let reason = node.wait_closed(id, WAIT).await.unwrap();
    assert!(matches!(reason, DisconnectReason::BadChecksum { .. }));
    assert_eq!(node.kernel.count(), 0);

    node.shutdown().await;
}
