//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt layer filtered by the configured
//! level. `RUST_LOG` takes precedence when set.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::hal_config::{HalConfig, LogFormat};

fn filter_for(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| anyhow!("invalid log level {:?}: {}", level, e)),
    }
}

/// Install the global subscriber described by `config`
///
/// Fails if a global subscriber is already installed.
pub fn init(config: &HalConfig) -> Result<()> {
    let filter = filter_for(&config.log_level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true);

    let installed = match config.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}

/// Best-effort subscriber for tests, writing through the test harness
pub fn init_for_tests() {
    let filter = filter_for("debug").unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(filter_for("wlctl=loud").is_err());
        }
    }

    #[test]
    fn test_second_init_is_harmless_for_tests() {
        init_for_tests();
        init_for_tests();
        tracing::debug!("logging initialised twice");
    }
}
