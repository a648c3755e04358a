//! Transport Layer
//!
//! Blocking, message-oriented transports for the wireless control socket.
//! A transport carries whole messages: one `send` writes one message, and
//! one successful receive returns everything a single socket read produced,
//! which may be several messages packed back to back.

use crate::Result;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub mod memory;
#[cfg(target_os = "linux")]
pub mod netlink;

pub use memory::{memory_pair, MemoryConfig, MemoryTransport, MockDevice};
#[cfg(target_os = "linux")]
pub use netlink::{NetlinkConfig, NetlinkTransport};

/// Transport trait for all control socket implementations
///
/// Sends may arrive from any thread; receives come only from the single
/// receive loop.
pub trait Transport: Send + Sync {
    /// Send one complete message
    fn send(&self, message: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for inbound data
    ///
    /// `Ok(None)` means nothing arrived in time; a closed transport is an error.
    fn receive_timeout(&self, timeout: Duration) -> Result<Option<Bytes>>;

    /// Check if transport is healthy
    fn is_healthy(&self) -> bool;

    /// Get transport-specific information
    fn transport_info(&self) -> TransportInfo;

    /// Stop accepting traffic; later sends and receives fail with `Closed`
    fn close(&self);
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Kernel generic netlink socket
    Netlink,
    /// In-process channel pair
    Memory,
}

/// Transport information for monitoring
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub transport_type: TransportType,
    /// Port id assigned to the local socket, if any
    pub local_port: Option<u32>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Traffic counters shared by transport implementations
#[derive(Debug, Default)]
pub(crate) struct TrafficCounters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl TrafficCounters {
    pub(crate) fn record_send(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_receive(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn info(&self, transport_type: TransportType, local_port: Option<u32>) -> TransportInfo {
        TransportInfo {
            transport_type,
            local_port,
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
