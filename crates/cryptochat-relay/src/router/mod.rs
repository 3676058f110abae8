//! Frame routing between peers.

mod forwarder;

pub use forwarder::{FanoutReport, FrameForwarder};
