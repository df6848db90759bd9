//! Development-time tracing for debugging the agent loop.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of the agent's memory.
//!
//! - **Iteration logging (`io/iteration_log`)**: Product artifacts in
//!   `.memloop/iterations/`. Controlled by `record_iterations`, unaffected by
//!   `RUST_LOG`.
//!
//! - **Result records**: What the model itself sees, stored under
//!   `/working/results`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=memloop=debug memloop run --max-iterations 3
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // A subscriber may already be installed.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
