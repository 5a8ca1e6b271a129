//! Development-time tracing for debugging the dispatcher.
//!
//! Dev diagnostics only, driven by `RUST_LOG` and written to stderr. Product
//! output (task listings, the digest, the progress log) never goes through
//! tracing, so stdout stays scriptable.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=dispatcher=debug cargo run -- step
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
