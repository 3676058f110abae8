//! Shared tracing/logging initialization.
//!
//! Both cryptochat-relay and the cryptochat peer binary use the same
//! pattern for setting up `tracing_subscriber` with an env-filter and
//! optional JSON output.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for `cryptochat-relay`.
pub const RELAY_LOG_FILTER: &str = "cryptochat_relay=info,cryptochat_core=info";

/// Default filter for the `cryptochat` peer binary. Its own events carry the
/// `cryptochat` target, the library's carry `cryptochat_cli`.
pub const PEER_LOG_FILTER: &str = "cryptochat=info,cryptochat_cli=info,cryptochat_core=info";

fn build_filter(default_filter: &str, rust_log: Option<String>) -> EnvFilter {
    EnvFilter::new(rust_log.unwrap_or_else(|| default_filter.into()))
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. [`RELAY_LOG_FILTER`]).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Logs go to stderr so they never interleave with chat output on stdout.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = build_filter(default_filter, std::env::var("RUST_LOG").ok());
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
