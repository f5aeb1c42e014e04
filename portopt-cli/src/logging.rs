//! Tracing subscriber setup for the binary.
//!
//! Log lines go to stderr so stdout carries only the JSON result.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "portopt=info,portopt_core=info,portopt_runner=info";

/// Install the global subscriber. `verbose` raises the default to debug.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        DEFAULT_FILTER.replace("=info", "=debug")
    } else {
        DEFAULT_FILTER.to_string()
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    // A second init (tests) is harmless.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .try_init();
}
