//! Tracing setup, grounded on `angzarr`'s `tracing`/`tracing-subscriber`
//! initialization in its `src/bin/*` entry points.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormatter};

/// Initialize the global tracing subscriber from `LogConfig`.
///
/// Safe to call once per process; a second call is a logic error in the
/// embedding application, not something this crate guards against (mirrors
/// `tracing_subscriber::registry().init()`'s own panic-on-reinit behavior).
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_env("SAKE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter_str()));

    let registry = tracing_subscriber::registry().with(filter);

    match config.formatter {
        LogFormatter::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormatter::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }

    if !config.fields.is_empty() {
        tracing::info!(fields = ?config.fields, "logger initialized with static fields");
    }
}
