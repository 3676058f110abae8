//! Relay server: accept loop and per-connection handling.

mod error;
mod handler;
mod listener;

pub use error::RelayError;
pub use handler::ConnectionHandler;
pub use listener::Relay;
