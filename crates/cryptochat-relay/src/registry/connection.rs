//! In-memory registry of peer connections.
//!
//! Capacity is enforced with a semaphore: a connection takes a permit at
//! accept time ([`SlotReservation`]) and keeps it through the handshake. Only
//! [`PeerRegistry::register`] moves the permit into the active set, which
//! is the sole source of fan-out recipients. Dropping an unregistered
//! reservation (failed or timed-out handshake) frees the slot.
//!
//! [`PeerRegistry::close_all`] also fires a shutdown token; from then on
//! `register` refuses, so a handshake still in flight cannot join a relay
//! that is stopping.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cryptochat_core::ProtocolError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A serialized chat frame, length prefix included, shared between recipients.
pub type RelayFrame = Arc<[u8]>;

/// Opaque identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// A capacity slot held by a connection that has not finished its handshake.
#[derive(Debug)]
pub struct SlotReservation {
    id: PeerId,
    permit: OwnedSemaphorePermit,
}

impl SlotReservation {
    pub const fn peer_id(&self) -> PeerId {
        self.id
    }
}

/// Holds an active peer connection.
pub struct PeerHandle {
    pub id: PeerId,
    pub addr: SocketAddr,
    /// Sender for pushing frames to the peer's writer task.
    frame_tx: mpsc::Sender<RelayFrame>,
    /// Cancelled once the peer leaves the active set.
    cancel: CancellationToken,
}

impl PeerHandle {
    /// Queue a frame for this peer without waiting.
    ///
    /// A full queue or a closed writer both fail; the caller treats either
    /// as a failed write to this one recipient.
    pub fn try_send_frame(&self, frame: RelayFrame) -> Result<(), TrySendError<RelayFrame>> {
        self.frame_tx.try_send(frame)
    }

    /// Token cancelled when the connection is closed.
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct ActivePeer {
    handle: Arc<PeerHandle>,
    _slot: OwnedSemaphorePermit,
}

/// Thread-safe registry of active peer connections.
pub struct PeerRegistry {
    capacity: usize,
    slots: Arc<Semaphore>,
    peers: RwLock<HashMap<PeerId, ActivePeer>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl PeerRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not held by an active or handshaking connection.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Claim a capacity slot for a freshly accepted connection.
    pub fn try_reserve(&self) -> Result<SlotReservation, ProtocolError> {
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| ProtocolError::CapacityExceeded {
                capacity: self.capacity,
            })?;
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Ok(SlotReservation { id, permit })
    }

    /// Token fired once [`close_all`](Self::close_all) starts.
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Add a peer whose handshake completed to the active set.
    ///
    /// Fails with [`ProtocolError::RelayShuttingDown`] after `close_all`;
    /// the reservation is dropped and its slot freed.
    pub async fn register(
        &self,
        reservation: SlotReservation,
        addr: SocketAddr,
        frame_tx: mpsc::Sender<RelayFrame>,
    ) -> Result<Arc<PeerHandle>, ProtocolError> {
        let SlotReservation { id, permit } = reservation;
        let mut peers = self.peers.write().await;
        if self.shutdown.is_cancelled() {
            return Err(ProtocolError::RelayShuttingDown);
        }
        let handle = Arc::new(PeerHandle {
            id,
            addr,
            frame_tx,
            cancel: CancellationToken::new(),
        });
        peers.insert(
            id,
            ActivePeer {
                handle: Arc::clone(&handle),
                _slot: permit,
            },
        );
        drop(peers);
        info!(peer_id = %id, addr = %addr, "Peer connection registered");
        Ok(handle)
    }

    /// Remove a peer from the active set and close it.
    ///
    /// Safe to call more than once; only the first call has any effect.
    pub async fn unregister(&self, id: PeerId) -> Option<Arc<PeerHandle>> {
        let removed = self.peers.write().await.remove(&id);
        match removed {
            Some(peer) => {
                peer.handle.cancel.cancel();
                info!(peer_id = %id, "Peer connection unregistered");
                Some(peer.handle)
            }
            None => None,
        }
    }

    /// Get an active peer by ID.
    pub async fn get(&self, id: PeerId) -> Option<Arc<PeerHandle>> {
        self.peers.read().await.get(&id).map(|p| Arc::clone(&p.handle))
    }

    /// Check if a peer is in the active set.
    pub async fn is_active(&self, id: PeerId) -> bool {
        self.peers.read().await.contains_key(&id)
    }

    /// IDs of all active peers, sorted.
    pub async fn active_peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Count of active connections.
    pub async fn active_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Snapshot of every active peer except `from`.
    ///
    /// The lock is released before the caller touches any connection.
    pub async fn recipients(&self, from: PeerId) -> Vec<Arc<PeerHandle>> {
        self.peers
            .read()
            .await
            .iter()
            .filter(|(id, _)| **id != from)
            .map(|(_, p)| Arc::clone(&p.handle))
            .collect()
    }

    /// Close and remove every active peer, and refuse any later `register`.
    pub async fn close_all(&self) {
        self.shutdown.cancel();
        let drained: Vec<ActivePeer> = self.peers.write().await.drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), "Closing all peer connections");
        }
        for peer in drained {
            peer.handle.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[tokio::test]
    async fn register_and_get_peer() {
        let registry = PeerRegistry::new(2);
        let (tx, _rx) = mpsc::channel(4);

        let reservation = registry.try_reserve().unwrap();
        let id = reservation.peer_id();
        registry.register(reservation, addr(), tx).await.unwrap();

        assert!(registry.is_active(id).await);
        let handle = registry.get(id).await.unwrap();
        assert_eq!(handle.id, id);
        assert_eq!(handle.addr, addr());
    }

    #[tokio::test]
    async fn reservation_is_not_active() {
        let registry = PeerRegistry::new(2);
        let reservation = registry.try_reserve().unwrap();

        assert!(!registry.is_active(reservation.peer_id()).await);
        assert_eq!(registry.active_count().await, 0);
        assert_eq!(registry.available_slots(), 1);
    }

    #[tokio::test]
    async fn capacity_counts_active_and_handshaking() {
        let registry = PeerRegistry::new(2);
        let (tx, _rx) = mpsc::channel(4);

        let first = registry.try_reserve().unwrap();
        registry.register(first, addr(), tx).await.unwrap();
        let _handshaking = registry.try_reserve().unwrap();

        let third = registry.try_reserve();
        assert!(matches!(
            third,
            Err(ProtocolError::CapacityExceeded { capacity: 2 })
        ));
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn dropped_reservation_frees_slot() {
        let registry = PeerRegistry::new(1);
        let reservation = registry.try_reserve().unwrap();
        assert!(registry.try_reserve().is_err());

        drop(reservation);
        assert!(registry.try_reserve().is_ok());
    }

    #[tokio::test]
    async fn unregister_frees_slot_and_cancels() {
        let registry = PeerRegistry::new(1);
        let (tx, _rx) = mpsc::channel(4);

        let reservation = registry.try_reserve().unwrap();
        let id = reservation.peer_id();
        let handle = registry.register(reservation, addr(), tx).await.unwrap();
        assert_eq!(registry.available_slots(), 0);

        let removed = registry.unregister(id).await;
        assert!(removed.is_some());
        assert!(handle.is_closed());
        assert_eq!(registry.available_slots(), 1);
        assert!(!registry.is_active(id).await);
    }

    #[tokio::test]
    async fn unregister_twice_is_harmless() {
        let registry = PeerRegistry::new(2);
        let (tx, _rx) = mpsc::channel(4);

        let reservation = registry.try_reserve().unwrap();
        let id = reservation.peer_id();
        registry.register(reservation, addr(), tx).await.unwrap();

        assert!(registry.unregister(id).await.is_some());
        assert!(registry.unregister(id).await.is_none());
        assert_eq!(registry.available_slots(), 2);
    }

    #[tokio::test]
    async fn recipients_exclude_sender() {
        let registry = PeerRegistry::new(3);
        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::channel(4);
            let reservation = registry.try_reserve().unwrap();
            ids.push(reservation.peer_id());
            registry.register(reservation, addr(), tx).await.unwrap();
            receivers.push(rx);
        }

        let mut recipients: Vec<PeerId> = registry
            .recipients(ids[0])
            .await
            .iter()
            .map(|h| h.id)
            .collect();
        recipients.sort_unstable();
        assert_eq!(recipients, vec![ids[1], ids[2]]);
        assert_eq!(registry.active_peers().await, ids);
    }

    #[tokio::test]
    async fn close_all_empties_the_set() {
        let registry = PeerRegistry::new(2);
        let (tx, _rx) = mpsc::channel(4);
        let reservation = registry.try_reserve().unwrap();
        let handle = registry.register(reservation, addr(), tx).await.unwrap();

        registry.close_all().await;
        assert_eq!(registry.active_count().await, 0);
        assert!(handle.is_closed());
        assert_eq!(registry.available_slots(), 2);
    }

    #[tokio::test]
    async fn register_after_close_all_is_refused() {
        let registry = PeerRegistry::new(1);
        let handshaking = registry.try_reserve().unwrap();
        registry.close_all().await;
        assert!(registry.shutdown_token().is_cancelled());

        let (tx, _rx) = mpsc::channel(4);
        let refused = registry.register(handshaking, addr(), tx).await;
        assert!(matches!(refused, Err(ProtocolError::RelayShuttingDown)));
        assert_eq!(registry.active_count().await, 0);
        assert_eq!(registry.available_slots(), 1);
    }

    #[tokio::test]
    async fn concurrent_register_and_unregister() {
        let registry = Arc::new(PeerRegistry::new(16));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let (tx, _rx) = mpsc::channel(1);
                    let reservation = registry.try_reserve().unwrap();
                    let id = reservation.peer_id();
                    registry.register(reservation, addr(), tx).await.unwrap();
                    let _ = registry.recipients(id).await;
                    registry.unregister(id).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.active_count().await, 0);
        assert_eq!(registry.available_slots(), 16);
    }
}
