//! Tracing setup for the agent binary.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Reads `RUST_LOG`, defaulting to `info`
/// for this crate and `warn` for dependencies. Output goes to stderr.
///
/// ```bash
/// RUST_LOG=opus_agent=debug opus-agent
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,opus_agent=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
