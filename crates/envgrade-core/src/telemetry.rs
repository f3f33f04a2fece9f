//! Log output for envgrade binaries.
//!
//! Everything goes to stderr; stdout carries the report summary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber: plain text, or one JSON object per line
/// when `json` is set. `RUST_LOG` takes precedence over `level`.
///
/// Only the first call in a process installs anything.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let text_layer =
        (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init();
}
