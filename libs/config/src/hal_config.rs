//! HAL Configuration Module
//!
//! Provides configuration loading for the wireless control layer.
//! Supports an optional TOML file with `WLCTL_` environment overrides.
//! Capacities read here are fixed once the HAL is constructed.

use anyhow::{ensure, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::defaults;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Wireless control layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HalConfig {
    /// Maximum simultaneously outstanding commands
    pub max_live_commands: usize,

    /// Maximum simultaneously registered event subscriptions
    pub max_event_subscriptions: usize,

    /// Family resolved through the controller at startup
    pub family_name: String,

    /// Skip resolution and use this family id directly
    pub family_id: Option<u16>,

    /// Interface addressed by per-interface commands
    pub interface_index: Option<u32>,

    pub poll_interval_ms: u64,
    pub recv_buffer_size: usize,
    pub max_message_size: usize,

    /// Legacy multicast group bitmask joined by the socket
    ///
    /// Covers groups 1 to 32 only; higher ids go in `multicast_memberships`.
    pub multicast_groups: u32,
    /// Multicast group ids joined by id after the socket is bound
    pub multicast_memberships: Vec<u32>,

    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            max_live_commands: defaults::MAX_LIVE_COMMANDS,
            max_event_subscriptions: defaults::MAX_EVENT_SUBSCRIPTIONS,
            family_name: defaults::FAMILY_NAME.to_string(),
            family_id: None,
            interface_index: None,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            recv_buffer_size: defaults::RECV_BUFFER_SIZE,
            max_message_size: defaults::MAX_MESSAGE_SIZE,
            multicast_groups: 0,
            multicast_memberships: Vec::new(),
            log_level: defaults::LOG_LEVEL.to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl HalConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process environment
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading HAL config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (WLCTL_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let config: HalConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "HAL configuration loaded");
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: HalConfig = toml::from_str(text).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("Failed to serialize configuration")
    }

    /// Reject configurations the HAL cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_live_commands > 0,
            "max_live_commands must be at least 1"
        );
        ensure!(
            self.max_event_subscriptions > 0,
            "max_event_subscriptions must be at least 1"
        );
        ensure!(
            self.poll_interval_ms > 0,
            "poll_interval_ms must be at least 1"
        );
        ensure!(
            self.recv_buffer_size >= defaults::MIN_BUFFER_SIZE,
            "recv_buffer_size {} is smaller than a message header",
            self.recv_buffer_size
        );
        ensure!(
            self.max_message_size >= defaults::MIN_BUFFER_SIZE,
            "max_message_size {} is smaller than a message header",
            self.max_message_size
        );
        ensure!(
            !self.multicast_memberships.contains(&0),
            "multicast_memberships must not contain group 0"
        );
        ensure!(
            self.family_id.is_some() || !self.family_name.is_empty(),
            "either family_id or family_name must be set"
        );
        Ok(())
    }
}
