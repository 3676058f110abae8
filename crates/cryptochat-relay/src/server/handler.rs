//! Per-connection handling: handshake, then read and relay until close.

use std::net::SocketAddr;
use std::sync::Arc;

use cryptochat_core::wire::read_raw_frame;
use cryptochat_core::{ProtocolError, RelayConfig, relay_handshake};
use cryptochat_crypto::SessionKey;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::{PeerHandle, PeerRegistry, RelayFrame, SlotReservation};
use crate::router::FrameForwarder;

/// Shared state every connection task needs.
#[derive(Clone)]
pub struct ConnectionHandler {
    registry: Arc<PeerRegistry>,
    forwarder: FrameForwarder,
    session_key: Arc<SessionKey>,
    config: Arc<RelayConfig>,
}

impl ConnectionHandler {
    pub fn new(
        registry: Arc<PeerRegistry>,
        session_key: Arc<SessionKey>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            forwarder: FrameForwarder::new(Arc::clone(&registry)),
            registry,
            session_key,
            config,
        }
    }

    /// Run one connection from accept to close.
    ///
    /// The connection joins the active set only after its handshake
    /// succeeds. Every error is confined to this connection.
    pub async fn handle(self, mut stream: TcpStream, addr: SocketAddr, reservation: SlotReservation) {
        let peer_id = reservation.peer_id();
        debug!(peer_id = %peer_id, addr = %addr, "Starting handshake");

        let handshake = tokio::select! {
            () = self.registry.shutdown_token().cancelled() => Err(ProtocolError::RelayShuttingDown),
            res = relay_handshake(
                &mut stream,
                &self.session_key,
                self.config.handshake_timeout(),
            ) => res,
        };
        if let Err(e) = handshake {
            warn!(peer_id = %peer_id, addr = %addr, error = %e, "Handshake failed, closing connection");
            return;
        }

        let (mut reader, writer) = stream.into_split();
        let (frame_tx, frame_rx) = mpsc::channel(self.config.outbound_queue_depth);
        let handle = match self.registry.register(reservation, addr, frame_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                info!(peer_id = %peer_id, addr = %addr, error = %e, "Not admitting peer");
                return;
            }
        };
        info!(peer_id = %peer_id, addr = %addr, "Peer active");

        tokio::spawn(write_loop(
            writer,
            frame_rx,
            Arc::clone(&handle),
            Arc::clone(&self.registry),
        ));

        match self.read_loop(&mut reader, &handle).await {
            Ok(()) => debug!(peer_id = %peer_id, "Connection closed by relay"),
            Err(ProtocolError::PeerDisconnected) => {
                info!(peer_id = %peer_id, "Peer disconnected");
            }
            Err(e) => warn!(peer_id = %peer_id, error = %e, "Dropping peer after protocol error"),
        }
        self.registry.unregister(peer_id).await;
    }

    /// Read frames and hand them to the forwarder, in arrival order.
    async fn read_loop(
        &self,
        reader: &mut OwnedReadHalf,
        handle: &PeerHandle,
    ) -> Result<(), ProtocolError> {
        loop {
            let frame = tokio::select! {
                () = handle.cancellation().cancelled() => return Ok(()),
                frame = read_raw_frame(reader, self.config.max_frame_bytes) => frame?,
            };
            self.forwarder.relay(handle.id, RelayFrame::from(frame)).await;
        }
    }
}

/// Drain a peer's outbound queue into its socket.
///
/// A write error removes the peer from the active set, which also cancels
/// its reader.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frame_rx: mpsc::Receiver<RelayFrame>,
    handle: Arc<PeerHandle>,
    registry: Arc<PeerRegistry>,
) {
    let cancel = handle.cancellation().clone();
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = frame_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let written = tokio::select! {
            () = cancel.cancelled() => break,
            res = writer.write_all(&frame) => res,
        };
        if let Err(e) = written {
            warn!(peer_id = %handle.id, error = %e, "Write to peer failed");
            registry.unregister(handle.id).await;
            break;
        }
    }
    let _ = writer.shutdown().await;
    debug!(peer_id = %handle.id, "Writer stopped");
}
