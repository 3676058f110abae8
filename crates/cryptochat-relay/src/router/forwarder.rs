//! Fan-out of chat frames to every other active peer.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::registry::{PeerId, PeerRegistry, RelayFrame};

/// Outcome of relaying one frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    /// Recipients whose queue accepted the frame.
    pub delivered: Vec<PeerId>,
    /// Recipients dropped from the active set because the write failed.
    pub dropped: Vec<PeerId>,
}

/// Relays opaque frames between peers in a [`PeerRegistry`].
///
/// Frames are never parsed or decrypted here.
#[derive(Clone)]
pub struct FrameForwarder {
    registry: Arc<PeerRegistry>,
}

impl FrameForwarder {
    pub const fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Send `frame` to every active peer except `from`.
    ///
    /// A failed write to one recipient drops that recipient and moves on to
    /// the next; it never aborts the rest of the fan-out.
    pub async fn relay(&self, from: PeerId, frame: RelayFrame) -> FanoutReport {
        let mut report = FanoutReport::default();
        for peer in self.registry.recipients(from).await {
            match peer.try_send_frame(Arc::clone(&frame)) {
                Ok(()) => report.delivered.push(peer.id),
                Err(e) => {
                    let reason = match e {
                        TrySendError::Full(_) => "outbound queue full",
                        TrySendError::Closed(_) => "connection closed",
                    };
                    warn!(peer_id = %peer.id, from = %from, reason, "Dropping recipient after failed write");
                    self.registry.unregister(peer.id).await;
                    report.dropped.push(peer.id);
                }
            }
        }
        debug!(
            from = %from,
            delivered = report.delivered.len(),
            dropped = report.dropped.len(),
            bytes = frame.len(),
            "Frame relayed"
        );
        report
    }
}
