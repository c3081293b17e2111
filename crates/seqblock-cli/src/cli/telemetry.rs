//! Log output for the `seqblock` binary.
//!
//! Standard output carries only command results, so every log line goes to
//! standard error. The level defaults to `info` and follows `RUST_LOG` when it
//! is set, e.g. `RUST_LOG=seqblock=debug` to see each compare-and-swap
//! attempt.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(json: bool) -> anyhow::Result<()> {
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_thread_ids(true)
            .with_current_span(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
            .with_writer(std::io::stderr)
    });

    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
            .with_writer(std::io::stderr)
            .compact()
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(())
}
