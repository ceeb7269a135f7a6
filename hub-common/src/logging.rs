//! Structured logging init (§B.1), mirroring the way the agent's own
//! MCP server installs a subscriber: stderr writer, `RUST_LOG`-controlled
//! level, once per process.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber writing to stderr so stdout stays
/// free for whichever wire protocol is running on it. Safe to call more than
/// once; only the first call takes effect.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
