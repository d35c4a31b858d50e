//! Diagnostics sink: tracing subscriber writing to stdout.

use anyhow::{anyhow, Result};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber. `RUST_LOG` takes precedence over `verbose`.
pub fn init(verbose: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new(LevelFilter::DEBUG.to_string())
        } else {
            EnvFilter::new(LevelFilter::INFO.to_string())
        }
    });

    let console_layer = fmt::Layer::new()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(fmt::format::FmtSpan::NONE)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_filter(quiet_dependencies(env_filter));

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .map_err(|error| anyhow!("Failed to install log subscriber: {error}"))
}

// actix and mio are chatty at debug level.
fn quiet_dependencies(filter: EnvFilter) -> EnvFilter {
    ["actix_server=info", "actix_http=info", "mio=warn"]
        .into_iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(filter, EnvFilter::add_directive)
}
