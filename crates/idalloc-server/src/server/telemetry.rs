//! # Logging
//!
//! The binary logs through `tracing`. Events are filtered by `RUST_LOG`
//! (default `info`) and rendered either as multi-line pretty output for local
//! use or as one JSON object per line for log shippers.
//!
//! ## Example usage
//!
//! ```bash
//! RUST_LOG=idalloc=debug,info cargo run -p idalloc-server -- --storage memory
//! LOG_FORMAT=json cargo run -p idalloc-server
//! ```

use super::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let pretty = (format == LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(ChronoLocal::rfc_3339())
            .with_file(true)
            .pretty()
    });

    let json = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_timer(ChronoLocal::rfc_3339())
            .json()
            .flatten_event(true)
            .with_current_span(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .try_init()?;

    Ok(())
}
