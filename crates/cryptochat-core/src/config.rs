//! Configuration resolution for `CryptoChat`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file passed with `--config` (JSON)
//! 3. Environment variables (`CRYPTOCHAT_*`)
//! 4. CLI arguments (highest priority, applied by the binaries)

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use cryptochat_crypto::FRAME_HEADER_SIZE;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Default relay port.
pub const DEFAULT_PORT: u16 = 12345;

/// Complete `CryptoChat` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub peer: PeerConfig,
}

/// Relay-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    /// Maximum peers, counting connections still in their handshake.
    pub capacity: usize,
    pub handshake_timeout_secs: u64,
    /// Largest accepted chat frame, length prefix excluded.
    pub max_frame_bytes: usize,
    /// Frames queued per recipient before it counts as a failed write.
    pub outbound_queue_depth: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            capacity: 2,
            handshake_timeout_secs: 10,
            max_frame_bytes: 64 * 1024,
            outbound_queue_depth: 64,
        }
    }
}

impl RelayConfig {
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("relay capacity must be at least 1".into()));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(Error::Config(
                "handshake timeout must be at least 1 second".into(),
            ));
        }
        validate_frame_limit(self.max_frame_bytes)?;
        if self.outbound_queue_depth == 0 {
            return Err(Error::Config(
                "outbound queue depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Peer-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Relay address as `host:port`.
    pub relay_addr: String,
    pub handshake_timeout_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            relay_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            handshake_timeout_secs: 10,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl PeerConfig {
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay_addr.is_empty() {
            return Err(Error::Config("relay address must not be empty".into()));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(Error::Config(
                "handshake timeout must be at least 1 second".into(),
            ));
        }
        validate_frame_limit(self.max_frame_bytes)
    }
}

fn validate_frame_limit(max_frame_bytes: usize) -> Result<()> {
    if max_frame_bytes <= FRAME_HEADER_SIZE {
        return Err(Error::Config(format!(
            "max frame size must exceed the {FRAME_HEADER_SIZE}-byte frame header"
        )));
    }
    if u32::try_from(max_frame_bytes).is_err() {
        return Err(Error::Config("max frame size must fit in a u32".into()));
    }
    Ok(())
}

/// Load configuration: defaults, then `path` if given, then environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    let parsed = raw.parse().ok();
    if parsed.is_none() {
        warn!(key, value = raw, "Ignoring unparseable environment override");
    }
    parsed
}

/// Apply `CRYPTOCHAT_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("CRYPTOCHAT_LISTEN_ADDR") {
        if let Some(addr) = parse_env("CRYPTOCHAT_LISTEN_ADDR", &val) {
            config.relay.listen_addr = addr;
        }
    }
    if let Some(val) = lookup("CRYPTOCHAT_CAPACITY") {
        if let Some(n) = parse_env("CRYPTOCHAT_CAPACITY", &val) {
            config.relay.capacity = n;
        }
    }
    if let Some(val) = lookup("CRYPTOCHAT_HANDSHAKE_TIMEOUT_SECS") {
        if let Some(n) = parse_env("CRYPTOCHAT_HANDSHAKE_TIMEOUT_SECS", &val) {
            config.relay.handshake_timeout_secs = n;
            config.peer.handshake_timeout_secs = n;
        }
    }
    if let Some(val) = lookup("CRYPTOCHAT_MAX_FRAME_BYTES") {
        if let Some(n) = parse_env("CRYPTOCHAT_MAX_FRAME_BYTES", &val) {
            config.relay.max_frame_bytes = n;
            config.peer.max_frame_bytes = n;
        }
    }
    if let Some(val) = lookup("CRYPTOCHAT_RELAY_ADDR") {
        config.peer.relay_addr = val;
    }
}
