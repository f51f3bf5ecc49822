//! Tracing subscriber initialization for the scheduler core.
//!
//! # Usage
//!
//! ```no_run
//! weavr_observe::tracing_setup::init_tracing(false).unwrap();
//! ```

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Installs a `fmt` layer with target visibility and span close timing,
/// filtered by `RUST_LOG` (`EnvFilter::from_default_env()`). When `json`
/// is true the `fmt` layer emits newline-delimited JSON instead of the
/// human-readable default, for deployments that ship logs to a collector.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env();

    if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init()?;
    }

    Ok(())
}
