//! Log output setup for the runtime.
//!
//! The runtime only installs a global subscriber when `log.install` is set;
//! embedding applications normally bring their own.

use tracing_subscriber::EnvFilter;

use crate::config::Settings;

/// Environment variable consulted before the configured level.
pub const LOG_ENV: &str = "EXTENSION_RUNTIME_LOG";

/// Filter directive derived from the `log` namespace.
///
/// Silent runtimes get `off`; otherwise `EXTENSION_RUNTIME_LOG` wins over `log.level`.
pub fn directive(settings: &Settings) -> String {
    if settings.log_silent() {
        return "off".to_string();
    }
    match std::env::var(LOG_ENV) {
        Ok(raw) if !raw.trim().is_empty() => raw,
        _ => settings.log_level().to_string(),
    }
}

/// Install a global fmt subscriber when `log.install` is set.
///
/// Returns true when this call installed the subscriber. A subscriber that
/// is already set, by this runtime or the host, is left alone. Silent
/// runtimes never install one, so the host can still set its own later.
pub fn init(settings: &Settings) -> bool {
    if !settings.bool("log.install").unwrap_or(false) || settings.log_silent() {
        return false;
    }

    let filter = EnvFilter::try_new(directive(settings)).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
