//! Tracing init for the demo binary.
//!
//! Grounded in the teacher's `graphweave-cli::logging` (an `EnvFilter` built
//! from `RUST_LOG`, writer chosen so that normal program output never shares
//! a stream with log lines). That module sends logs to a file or drops them
//! so the teacher's REPL prompt stays clean; this binary has no REPL, so logs
//! go to stderr instead, leaving stdout free for the state-delta stream the
//! demo prints.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
