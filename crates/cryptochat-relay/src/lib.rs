//! `CryptoChat` Relay Server Library
//!
//! Core functionality for the relay:
//! - Bounded accept loop with per-connection handshake
//! - Peer registry holding the active set and capacity slots
//! - Opaque fan-out of encrypted frames to every other peer

pub mod registry;
pub mod router;
pub mod server;

pub use registry::{PeerId, PeerRegistry};
pub use router::{FanoutReport, FrameForwarder};
pub use server::{Relay, RelayError};
