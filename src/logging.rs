//! `tracing` subscriber bootstrap for the binary.

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; otherwise `verbosity` picks info / debug / trace.
/// Logs go to stderr so stdout stays clean for command output.
pub fn init(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    // try_init: a second call (tests) keeps the first subscriber
    let _ = if json { builder.json().try_init() } else { builder.try_init() };
}
