//! `CryptoChat` Relay Server
//!
//! Hands the session key to each peer that completes the handshake and
//! relays encrypted frames between them.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use cryptochat_core::config::load_config;
use cryptochat_core::tracing_init::{RELAY_LOG_FILTER, init_tracing};
use cryptochat_relay::Relay;

#[derive(Parser, Debug)]
#[command(name = "cryptochat-relay")]
#[command(version, about = "CryptoChat relay - encrypted group chat broker")]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "CRYPTOCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Maximum concurrent peers (handshaking connections included).
    #[arg(long)]
    capacity: Option<usize>,

    /// Seconds a peer has to finish the handshake.
    #[arg(long)]
    handshake_timeout_secs: Option<u64>,

    /// Largest chat frame accepted, in bytes.
    #[arg(long)]
    max_frame_bytes: Option<usize>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(RELAY_LOG_FILTER, args.log_json);

    let mut config = load_config(args.config.as_deref())?.relay;
    if let Some(addr) = args.addr {
        config.listen_addr = addr;
    }
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if let Some(secs) = args.handshake_timeout_secs {
        config.handshake_timeout_secs = secs;
    }
    if let Some(bytes) = args.max_frame_bytes {
        config.max_frame_bytes = bytes;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr,
        "Starting cryptochat-relay"
    );

    let relay = Relay::bind(config).await?;
    relay
        .serve_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
