//! # Wireless Control Configuration
//!
//! Configuration loading and logging setup for the wireless control layer.
//!
//! ## Usage
//!
//! ```no_run
//! use wlctl_config::{logging, HalConfig};
//!
//! let config = HalConfig::load(None)?;
//! logging::init(&config)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod defaults;
pub mod hal_config;
pub mod logging;

// Re-export commonly used types
pub use hal_config::{HalConfig, LogFormat};
