//! `CryptoChat` Peer
//!
//! Reads lines from stdin, sends each as an encrypted message through the
//! relay, and prints the messages other peers send.

use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufReader;
use tracing::info;

use cryptochat_cli::{ChatExit, PeerSession, run_chat};
use cryptochat_core::config::load_config;
use cryptochat_core::tracing_init::{PEER_LOG_FILTER, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "cryptochat")]
#[command(version, about = "CryptoChat peer - encrypted group chat client")]
struct Cli {
    /// Relay address (host:port).
    #[arg(long, env = "CRYPTOCHAT_RELAY_ADDR")]
    relay: Option<String>,

    /// Path to a JSON config file.
    #[arg(long, env = "CRYPTOCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds to wait for the handshake to finish.
    #[arg(long)]
    handshake_timeout_secs: Option<u64>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(PEER_LOG_FILTER, cli.log_json);

    let mut config = load_config(cli.config.as_deref())?.peer;
    if let Some(relay) = cli.relay {
        config.relay_addr = relay;
    }
    if let Some(secs) = cli.handshake_timeout_secs {
        config.handshake_timeout_secs = secs;
    }
    config.validate()?;

    let session = PeerSession::connect(&config).await?;
    info!(relay = %session.relay_addr(), "Joined chat, empty line to quit");

    let (sender, receiver) = session.split();
    let input = BufReader::new(tokio::io::stdin());
    let exit = tokio::select! {
        result = run_chat(sender, receiver, input, tokio::io::stdout()) => result?,
        _ = tokio::signal::ctrl_c() => ChatExit::InputClosed,
    };

    match exit {
        ChatExit::InputClosed => info!("Left chat"),
        ChatExit::RelayClosed => info!("Relay ended the session"),
    }
    Ok(())
}
