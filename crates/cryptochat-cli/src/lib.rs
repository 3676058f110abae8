//! `CryptoChat` Peer Library
//!
//! Client side of the relay protocol: connect, run the handshake, then
//! exchange encrypted chat messages.

pub mod chat;
pub mod connection;

pub use chat::{ChatExit, run_chat};
pub use connection::{ChatReceiver, ChatSender, PeerSession};
