//! Telemetry
//!
//! Sets up `tracing-subscriber` for structured logging. Pretty output in
//! debug builds, JSON in release builds.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for a log level, scoped to this crate as well as globally
pub fn filter_directive(log_level: &str) -> String {
    format!("{},recap_engine={}", log_level, log_level)
}

/// Initialize the tracing subscriber with the given log level.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter.
/// Logs go to stderr so run output on stdout stays clean.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Initialize with "info" unless `RUST_LOG` is set.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
