//! Default configuration values
//!
//! Shared by `HalConfig`'s serde defaults and its `Default` impl so that a
//! missing key and a missing file resolve to the same value.

/// Live command table capacity
pub const MAX_LIVE_COMMANDS: usize = 16;

/// Event subscription table capacity
pub const MAX_EVENT_SUBSCRIPTIONS: usize = 32;

/// Generic netlink family carrying wireless control traffic
pub const FAMILY_NAME: &str = "nl80211";

/// How often the receive loop wakes to check for shutdown (milliseconds)
pub const POLL_INTERVAL_MS: u64 = 100;

/// Userspace receive buffer (bytes)
pub const RECV_BUFFER_SIZE: usize = 32 * 1024;

/// Largest outbound message (bytes)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Smallest buffer able to hold a message and generic header
pub const MIN_BUFFER_SIZE: usize = 20;

pub const LOG_LEVEL: &str = "info";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "WLCTL";
