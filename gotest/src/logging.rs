//! Development-time tracing.
//!
//! Tracing goes to stderr. Product output (tree listings, results, reports)
//! is written to stdout or files and is unaffected by it.
//!
//! Useful targets:
//! - `gotest::io::discovery`: package listing and file parsing
//! - `gotest::core::builder`: dropped table cases, duplicate names, suites
//!   without a runner
//! - `gotest::core::correlate`: events that match no node
//! - `gotest::session`: launches, cancellation and timeouts

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise each `-v` raises the level of the
/// `gotest` targets while dependencies stay at `warn`.
///
/// # Example
/// ```bash
/// RUST_LOG=gotest::session=debug,gotest::core::correlate=trace gotest run --id example.com/m/pkg
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn default_directives(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,gotest=info",
        2 => "warn,gotest=debug",
        _ => "warn,gotest=trace",
    }
}
