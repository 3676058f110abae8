//! End-to-end tests: a relay on a loopback port with real peers.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cryptochat_cli::{ChatReceiver, ChatSender, PeerSession};
use cryptochat_core::wire::write_length_prefixed;
use cryptochat_core::{PeerConfig, ProtocolError, RelayConfig, peer_handshake};
use cryptochat_crypto::SessionKey;
use cryptochat_relay::{PeerRegistry, Relay};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

struct TestRelay {
    addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    session_key: Arc<SessionKey>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestRelay {
    async fn start(capacity: usize, handshake_timeout_secs: u64) -> Self {
        let config = RelayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            capacity,
            handshake_timeout_secs,
            ..RelayConfig::default()
        };
        let relay = Relay::bind(config).await.unwrap();
        let addr = relay.local_addr().unwrap();
        let registry = relay.registry();
        let session_key = relay.session_key();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(relay.serve_until(async {
            let _ = rx.await;
        }));
        Self {
            addr,
            registry,
            session_key,
            shutdown: Some(tx),
        }
    }

    fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            relay_addr: self.addr.to_string(),
            handshake_timeout_secs: 5,
            ..PeerConfig::default()
        }
    }

    async fn join(&self) -> (ChatSender, ChatReceiver) {
        let session = PeerSession::connect(&self.peer_config()).await.unwrap();
        assert_eq!(session.session_key(), self.session_key.as_ref());
        session.split()
    }

    async fn wait_for_active(&self, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self.registry.active_count().await != count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn wait_for_free_slots(&self, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self.registry.available_slots() != count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn assert_nothing_arrives(rx: &mut ChatReceiver) {
    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "unexpected message"
    );
}

#[tokio::test]
async fn two_peers_share_relay_key_and_chat() {
    let relay = TestRelay::start(2, 5).await;
    let (mut alice_tx, mut alice_rx) = relay.join().await;
    let (mut bob_tx, mut bob_rx) = relay.join().await;
    relay.wait_for_active(2).await;

    alice_tx.send(b"hello").await.unwrap();
    assert_eq!(bob_rx.recv().await.unwrap(), b"hello");
    assert_nothing_arrives(&mut alice_rx).await;

    bob_tx.send(b"hi alice").await.unwrap();
    assert_eq!(alice_rx.recv().await.unwrap(), b"hi alice");
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let relay = TestRelay::start(2, 5).await;
    let (mut tx, _rx) = relay.join().await;
    let (_other_tx, mut other_rx) = relay.join().await;
    relay.wait_for_active(2).await;

    for i in 0..20u8 {
        tx.send(&[i]).await.unwrap();
    }
    for i in 0..20u8 {
        assert_eq!(other_rx.recv().await.unwrap(), vec![i]);
    }
}

#[tokio::test]
async fn connection_beyond_capacity_is_refused() {
    let relay = TestRelay::start(2, 5).await;
    let _a = relay.join().await;
    let _b = relay.join().await;

    let refused = PeerSession::connect(&relay.peer_config()).await;
    assert!(matches!(refused, Err(ProtocolError::PeerDisconnected)));
    relay.wait_for_active(2).await;
}

#[tokio::test]
async fn departed_peer_frees_slot_and_others_keep_chatting() {
    let relay = TestRelay::start(2, 5).await;
    let leaving = relay.join().await;
    let (_bob_tx, mut bob_rx) = relay.join().await;
    relay.wait_for_active(2).await;

    drop(leaving);
    relay.wait_for_active(1).await;
    relay.wait_for_free_slots(1).await;

    let (mut carol_tx, _carol_rx) = relay.join().await;
    relay.wait_for_active(2).await;
    carol_tx.send(b"anyone here?").await.unwrap();
    assert_eq!(bob_rx.recv().await.unwrap(), b"anyone here?");
}

#[tokio::test]
async fn invalid_public_key_is_rejected_and_slot_released() {
    let relay = TestRelay::start(1, 5).await;

    let mut stream = TcpStream::connect(relay.addr).await.unwrap();
    let mut off_curve = [0u8; 65];
    off_curve[0] = 0x04;
    off_curve[64] = 0x01;
    write_length_prefixed(&mut stream, &off_curve).await.unwrap();

    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0, "relay must not reply to an invalid key");

    relay.wait_for_free_slots(1).await;
    let _peer = relay.join().await;
    relay.wait_for_active(1).await;
}

#[tokio::test]
async fn stalled_handshake_times_out_and_slot_is_reused() {
    let relay = TestRelay::start(1, 1).await;

    let mut silent = TcpStream::connect(relay.addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(5), silent.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    relay.wait_for_free_slots(1).await;
    let _peer = relay.join().await;
    relay.wait_for_active(1).await;
}

#[tokio::test]
async fn malformed_frame_disconnects_only_sender() {
    let relay = TestRelay::start(3, 5).await;
    let (_a_tx, mut a_rx) = relay.join().await;
    let (mut b_tx, _b_rx) = relay.join().await;

    let mut rogue = TcpStream::connect(relay.addr).await.unwrap();
    peer_handshake(&mut rogue, Duration::from_secs(5))
        .await
        .unwrap();
    relay.wait_for_active(3).await;
    write_length_prefixed(&mut rogue, b"short").await.unwrap();
    relay.wait_for_active(2).await;

    b_tx.send(b"still here").await.unwrap();
    assert_eq!(a_rx.recv().await.unwrap(), b"still here");
    assert_nothing_arrives(&mut a_rx).await;
}

#[tokio::test]
async fn half_closed_peer_is_removed() {
    let relay = TestRelay::start(2, 5).await;
    let (tx, _rx) = relay.join().await;
    relay.wait_for_active(1).await;

    tx.close().await.unwrap();
    relay.wait_for_active(0).await;
    relay.wait_for_free_slots(2).await;
}

#[tokio::test]
async fn shutdown_disconnects_peers() {
    let mut relay = TestRelay::start(2, 5).await;
    let (_tx, mut rx) = relay.join().await;
    relay.wait_for_active(1).await;

    relay.stop();
    let result = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert!(matches!(result, Err(ProtocolError::PeerDisconnected)));
}

#[tokio::test]
async fn shutdown_closes_connections_still_handshaking() {
    let mut relay = TestRelay::start(2, 30).await;
    let mut pending = TcpStream::connect(relay.addr).await.unwrap();
    relay.wait_for_free_slots(1).await;

    relay.stop();
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(5), pending.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
    relay.wait_for_free_slots(2).await;
    assert_eq!(relay.registry.active_count().await, 0);
}

#[tokio::test]
async fn reset_recipient_is_dropped_while_others_keep_receiving() {
    let relay = TestRelay::start(3, 5).await;
    let (mut alice_tx, _alice_rx) = relay.join().await;
    let (_bob_tx, mut bob_rx) = relay.join().await;

    let mut carol = TcpStream::connect(relay.addr).await.unwrap();
    peer_handshake(&mut carol, Duration::from_secs(5))
        .await
        .unwrap();
    relay.wait_for_active(3).await;

    #[allow(deprecated)]
    carol.set_linger(Some(Duration::ZERO)).unwrap();
    drop(carol);

    for i in 0..50u8 {
        alice_tx.send(&[i; 512]).await.unwrap();
    }
    for i in 0..50u8 {
        assert_eq!(bob_rx.recv().await.unwrap(), vec![i; 512]);
    }
    relay.wait_for_active(2).await;
}

#[tokio::test]
async fn oversized_message_keeps_sender_connected() {
    let relay = TestRelay::start(2, 5).await;
    let (mut alice_tx, _alice_rx) = relay.join().await;
    let (_bob_tx, mut bob_rx) = relay.join().await;
    relay.wait_for_active(2).await;

    let oversized = vec![b'x'; 70_000];
    assert!(matches!(
        alice_tx.send(&oversized).await,
        Err(ProtocolError::ProtocolViolation(_))
    ));
    alice_tx.send(b"small").await.unwrap();
    assert_eq!(bob_rx.recv().await.unwrap(), b"small");
    assert_eq!(relay.registry.active_count().await, 2);
}
