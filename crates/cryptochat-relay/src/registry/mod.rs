//! Active peer set and capacity accounting.

mod connection;

pub use connection::{PeerHandle, PeerId, PeerRegistry, RelayFrame, SlotReservation};
