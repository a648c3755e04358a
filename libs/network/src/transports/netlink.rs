//! Generic Netlink Socket Transport
//!
//! Raw `AF_NETLINK` / `NETLINK_GENERIC` datagram socket. The kernel assigns
//! the local port id at bind time; one `recv` may return several messages
//! packed back to back, which the receive loop splits by length.

use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use nix::errno::Errno;
use nix::libc;
use nix::sys::socket::{
    bind, getsockname, recv, send, setsockopt, socket, sockopt, AddressFamily, MsgFlags,
    NetlinkAddr, SockFlag, SockProtocol, SockType,
};
use nix::sys::time::TimeVal;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{TrafficCounters, Transport, TransportInfo, TransportType};
use crate::{Result, TransportError};

/// Netlink socket configuration
#[derive(Debug, Clone)]
pub struct NetlinkConfig {
    /// Size of the userspace receive buffer
    pub recv_buffer_size: usize,
    /// Maximum message size accepted by `send`
    pub max_message_size: usize,
    /// Legacy multicast group bitmask joined at bind time
    ///
    /// Only names groups 1 to 32; use `memberships` for anything higher.
    pub groups: u32,
    /// Multicast group ids joined after bind
    pub memberships: Vec<u32>,
    /// Kernel socket receive buffer, if it should be raised
    pub socket_rcvbuf: Option<usize>,
}

impl Default for NetlinkConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: crate::DEFAULT_RECV_BUFFER_SIZE,
            max_message_size: crate::DEFAULT_MAX_MESSAGE_SIZE,
            groups: 0,
            memberships: Vec::new(),
            socket_rcvbuf: None,
        }
    }
}

/// Generic netlink control socket
pub struct NetlinkTransport {
    fd: OwnedFd,
    port: u32,
    config: NetlinkConfig,
    recv_buf: Mutex<Vec<u8>>,
    /// Receive timeout currently applied to the socket
    applied_timeout: Mutex<Option<Duration>>,
    closed: AtomicBool,
    counters: TrafficCounters,
}

impl NetlinkTransport {
    /// Open and bind a generic netlink socket
    pub fn open(config: NetlinkConfig) -> Result<Self> {
        if config.recv_buffer_size == 0 {
            return Err(TransportError::configuration(
                "receive buffer must be non-zero",
                Some("recv_buffer_size"),
            ));
        }

        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::NetlinkGeneric,
        )
        .map_err(|e| TransportError::network_with_source("Failed to create netlink socket", e))?;

        if let Some(size) = config.socket_rcvbuf {
            setsockopt(&fd, sockopt::RcvBuf, &size).map_err(|e| {
                TransportError::network_with_source("Failed to set socket receive buffer", e)
            })?;
        }

        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, config.groups))
            .map_err(|e| TransportError::network_with_source("Failed to bind netlink socket", e))?;

        for &group in &config.memberships {
            add_membership(&fd, group)?;
        }

        let local: NetlinkAddr = getsockname(fd.as_raw_fd()).map_err(|e| {
            TransportError::network_with_source("Failed to read netlink port id", e)
        })?;
        let port = local.pid();

        info!(
            port,
            groups = config.groups,
            memberships = ?config.memberships,
            "Netlink control socket bound"
        );

        Ok(Self {
            fd,
            port,
            recv_buf: Mutex::new(vec![0u8; config.recv_buffer_size]),
            config,
            applied_timeout: Mutex::new(None),
            closed: AtomicBool::new(false),
            counters: TrafficCounters::default(),
        })
    }

    /// Port id the kernel assigned to this socket
    pub fn port(&self) -> u32 {
        self.port
    }

    /// Join multicast group `group` by id
    pub fn join_group(&self, group: u32) -> Result<()> {
        self.check_open()?;
        add_membership(&self.fd, group)?;
        debug!(group, "Joined multicast group");
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed("netlink socket closed"));
        }
        Ok(())
    }

    fn apply_timeout(&self, timeout: Duration) -> Result<()> {
        // A zero timeout would mean "block forever" to the kernel
        let timeout = timeout.max(Duration::from_millis(1));
        let mut applied = self.applied_timeout.lock();
        if *applied == Some(timeout) {
            return Ok(());
        }

        let tv = TimeVal::new(timeout.as_secs() as _, timeout.subsec_micros() as _);
        setsockopt(&self.fd, sockopt::ReceiveTimeout, &tv).map_err(|e| {
            TransportError::network_with_source("Failed to set receive timeout", e)
        })?;
        *applied = Some(timeout);
        Ok(())
    }
}

fn add_membership(fd: &OwnedFd, group: u32) -> Result<()> {
    if group == 0 {
        return Err(TransportError::configuration(
            "multicast group id must be non-zero",
            Some("memberships"),
        ));
    }
    // SAFETY: the option value points at a live u32 whose size is passed with it
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_NETLINK,
            libc::NETLINK_ADD_MEMBERSHIP,
            (&group as *const u32).cast(),
            std::mem::size_of::<u32>() as libc::socklen_t,
        )
    };
    Errno::result(rc).map_err(|e| {
        TransportError::network_with_source(format!("Failed to join multicast group {}", group), e)
    })?;
    Ok(())
}

impl Transport for NetlinkTransport {
    fn send(&self, message: &[u8]) -> Result<()> {
        self.check_open()?;
        if message.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: message.len(),
                max: self.config.max_message_size,
            });
        }

        let written = send(self.fd.as_raw_fd(), message, MsgFlags::empty())
            .map_err(|e| TransportError::network_with_source("Netlink send failed", e))?;
        if written != message.len() {
            return Err(TransportError::network(format!(
                "Short netlink send: {} of {} bytes",
                written,
                message.len()
            )));
        }

        self.counters.record_send(written);
        Ok(())
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        self.check_open()?;
        self.apply_timeout(timeout)?;

        let mut buf = self.recv_buf.lock();
        match recv(self.fd.as_raw_fd(), &mut buf[..], MsgFlags::empty()) {
            Ok(0) => Ok(None),
            Ok(n) => {
                if n == buf.len() {
                    warn!(
                        size = n,
                        "Netlink read filled the receive buffer; trailing messages may be truncated"
                    );
                }
                self.counters.record_receive(n);
                Ok(Some(Bytes::copy_from_slice(&buf[..n])))
            }
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(None),
            Err(Errno::ENOBUFS) => {
                warn!("Netlink receive buffer overrun; notifications were dropped");
                Err(TransportError::Overrun)
            }
            Err(e) => Err(TransportError::network_with_source("Netlink recv failed", e)),
        }
    }

    fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn transport_info(&self) -> TransportInfo {
        self.counters.info(TransportType::Netlink, Some(self.port))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(port = self.port, "Netlink control socket closed");
        }
    }
}
