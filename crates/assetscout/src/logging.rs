//! Process-wide log setup.
//!
//! The engine logs through `tracing`; the database layer uses `log`, whose
//! records are forwarded into the same subscriber.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber if none is active yet.
///
/// `RUST_LOG` wins over `config.level`. Calling this more than once is
/// harmless; only the first call has an effect. Returns whether this call
/// installed the subscriber.
pub fn init_logging(config: &LoggingConfig) -> bool {
    if LOGGING_INIT.get().is_some() {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish()).is_ok()
    } else {
        tracing::subscriber::set_global_default(builder.finish()).is_ok()
    };

    // Another logger may already own the `log` facade; keep going without it.
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("log bridge not installed: {}", e);
    }

    let _ = LOGGING_INIT.set(());
    installed
}
