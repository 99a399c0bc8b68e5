//! # Logging
//!
//! The demo always logs through `tracing`. The `millrace` library emits its
//! own events (pool start, worker exits, job panics, completion) through the
//! same subscriber because the demo enables its `tracing` feature.
//!
//! Verbosity is controlled by `RUST_LOG` and defaults to `info`:
//!
//! ```bash
//! RUST_LOG=info,millrace=trace cargo run -p millrace-demo -- ordered
//! ```
//!
//! `--log-format json` switches to one JSON object per line, for piping into
//! `jq` or a log collector.

use super::config::LogFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    match format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .with_file(true)
                    .pretty(),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_thread_ids(true)
                    .with_current_span(false)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
            )
            .try_init()?,
    }

    Ok(())
}
