//! Tracing subscriber setup for the binary. Logs go to stderr so that
//! batch summaries on stdout stay machine-friendly.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default directive: `hrmlink=info`, `warn` with --quiet, `debug` with -v,
/// `trace` with -vv. `RUST_LOG` wins when set.
pub fn init(quiet: bool, verbose: u8, no_color: bool) -> Result<()> {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };

    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) if !spec.is_empty() => EnvFilter::try_new(spec)?,
        _ => EnvFilter::new("warn").add_directive(format!("hrmlink={level}").parse()?),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!no_color)
                .with_target(false),
        )
        .try_init()?;

    Ok(())
}
