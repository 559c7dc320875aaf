//! Tracing initialisation for climproc binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter from `RUST_LOG`, or `level` when it is unset or unparsable.
pub fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber.
///
/// With `json` every line is a JSON object. Logs always go to stderr;
/// stdout carries command results.
pub fn init_tracing(json: bool, level: Level) {
    let json_layer = json.then(|| fmt::layer().with_writer(std::io::stderr).json());
    let text_layer =
        (!json).then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .ok();
}
