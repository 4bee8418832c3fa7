//! Logging initialization.
//!
//! Installs a global `tracing` subscriber honoring `RUST_LOG` (or
//! `WARDEN_LOG` as a product-specific override) via
//! `tracing-subscriber`'s env filter. `--json-logs` switches the formatter
//! to newline-delimited JSON for daemon-mode consumption.

use tracing_subscriber::EnvFilter;

fn filter() -> EnvFilter {
    if let Ok(v) = std::env::var("WARDEN_LOG") {
        return EnvFilter::new(v);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Call once, at process start.
pub fn init(json_logs: bool) {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let registry = tracing_subscriber::registry().with(filter());

    if json_logs {
        let _ = registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}
