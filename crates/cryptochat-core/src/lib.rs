//! `CryptoChat` Core Library
//!
//! Shared functionality for the relay and peer binaries:
//! - Length-prefixed wire framing
//! - Relay-side and peer-side handshake state machines
//! - Configuration resolution
//! - Common error types and tracing setup

pub mod config;
pub mod error;
pub mod handshake;
pub mod tracing_init;
pub mod wire;

pub use config::{Config, PeerConfig, RelayConfig};
pub use error::{Error, ProtocolError, Result};
pub use handshake::{
    PeerHandshake, PeerHandshakeState, RelayHandshake, RelayHandshakeState, peer_handshake,
    relay_handshake,
};
