//! Control Socket Transports
//!
//! Blocking, message-oriented transports for the wireless control socket:
//! the kernel generic netlink socket on Linux, and an in-memory channel pair
//! whose device side stands in for the kernel in tests.

pub mod error;
pub mod transports;

pub use error::{Result, TransportError};
pub use transports::{
    memory_pair, MemoryConfig, MemoryTransport, MockDevice, Transport, TransportInfo,
    TransportType,
};
#[cfg(target_os = "linux")]
pub use transports::{NetlinkConfig, NetlinkTransport};

/// Default size of the userspace receive buffer
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 32 * 1024;
/// Default upper bound on an outbound message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;
