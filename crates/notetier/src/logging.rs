//! Tracing setup for binaries and tests embedding the engine.
//!
//! The library itself only emits `tracing` events. Hosts that want them printed
//! call [`init_logging`] (or [`init_logging_from`] with a loaded
//! [`EngineConfig`]) once; `RUST_LOG` wins over the level passed in.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::EngineConfig;

static INIT: OnceLock<()> = OnceLock::new();

/// Installs a `fmt` subscriber filtered at `level` (e.g. `"info"`,
/// `"notetier=debug"`). Later calls, or an already-installed global
/// subscriber, are left alone.
pub fn init_logging(level: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level));
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    });
}

/// [`init_logging`] at the configured `log_level`.
pub fn init_logging_from(config: &EngineConfig) {
    init_logging(&config.log_level);
}

/// The filter for `level`, or `info` when `level` does not parse.
fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Like [`init_logging`], writing through the test harness capture.
pub fn init_test_logging() {
    INIT.get_or_init(|| {
        let _ = fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_logging("debug");
        init_logging("not a filter ===");
        init_logging_from(&EngineConfig::default());
        tracing::info!("logging initialized");
    }

    #[test]
    fn test_filter_follows_configured_level() {
        let config = EngineConfig {
            log_level: "notetier=debug".to_string(),
            ..Default::default()
        };
        assert_eq!(filter_for(&config.log_level).to_string(), "notetier=debug");
        assert_eq!(filter_for("notetier=loud").to_string(), "info");
    }
}
