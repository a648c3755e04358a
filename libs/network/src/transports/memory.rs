//! In-Memory Transport
//!
//! A channel pair standing in for the kernel control socket. The host side
//! implements [`Transport`]; the [`MockDevice`] side observes what was sent
//! and injects replies, acknowledgements and notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::debug;
use wlctl_codec::{encode_ack, encode_done, IncomingMessage};

use super::{TrafficCounters, Transport, TransportInfo, TransportType};
use crate::{Result, TransportError};

/// In-memory transport configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum message size accepted by `send`
    pub max_message_size: usize,
    /// Port id reported for the host side
    pub local_port: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_message_size: crate::DEFAULT_MAX_MESSAGE_SIZE,
            local_port: 4242,
        }
    }
}

/// Create a connected host transport and device pair
pub fn memory_pair(config: MemoryConfig) -> (MemoryTransport, MockDevice) {
    let (to_device, sent) = unbounded();
    let (inject, from_device) = unbounded();
    let closed = Arc::new(AtomicBool::new(false));

    let transport = MemoryTransport {
        to_device,
        from_device,
        closed: closed.clone(),
        config: config.clone(),
        counters: TrafficCounters::default(),
    };
    let device = MockDevice {
        sent,
        inject: Some(inject),
        closed,
        port: config.local_port,
    };
    (transport, device)
}

/// Host side of the in-memory channel pair
pub struct MemoryTransport {
    to_device: Sender<Bytes>,
    from_device: Receiver<Bytes>,
    closed: Arc<AtomicBool>,
    config: MemoryConfig,
    counters: TrafficCounters,
}

impl MemoryTransport {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed("memory transport closed"));
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: &[u8]) -> Result<()> {
        self.check_open()?;
        if message.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: message.len(),
                max: self.config.max_message_size,
            });
        }

        self.to_device
            .send(Bytes::copy_from_slice(message))
            .map_err(|_| TransportError::closed("device side dropped"))?;
        self.counters.record_send(message.len());
        Ok(())
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        self.check_open()?;
        match self.from_device.recv_timeout(timeout) {
            Ok(bytes) => {
                self.counters.record_receive(bytes.len());
                Ok(Some(bytes))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::closed("device side dropped"))
            }
        }
    }

    fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn transport_info(&self) -> TransportInfo {
        self.counters
            .info(TransportType::Memory, Some(self.config.local_port))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Device side of the in-memory channel pair, playing the kernel's role
pub struct MockDevice {
    sent: Receiver<Bytes>,
    inject: Option<Sender<Bytes>>,
    closed: Arc<AtomicBool>,
    port: u32,
}

impl MockDevice {
    /// Next message the host sent, waiting up to `timeout`
    pub fn recv_sent(&self, timeout: Duration) -> Option<Bytes> {
        self.sent.recv_timeout(timeout).ok()
    }

    /// Next message the host sent, without waiting
    pub fn try_recv_sent(&self) -> Option<Bytes> {
        match self.sent.try_recv() {
            Ok(bytes) => Some(bytes),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Sequence number of a sent message
    pub fn sequence_of(message: &[u8]) -> Option<u32> {
        IncomingMessage::parse_from(message)
            .ok()
            .and_then(|m| m.sequence())
    }

    /// Deliver raw bytes to the host as one socket read
    pub fn inject(&self, bytes: impl Into<Bytes>) -> Result<()> {
        let sender = self
            .inject
            .as_ref()
            .ok_or_else(|| TransportError::closed("device disconnected"))?;
        let bytes = bytes.into();
        debug!(len = bytes.len(), "Injecting inbound message");
        sender
            .send(bytes)
            .map_err(|_| TransportError::closed("host side dropped"))
    }

    /// Positive acknowledgement for `seq`
    pub fn ack(&self, seq: u32) -> Result<()> {
        self.inject(encode_ack(seq, 0, self.port))
    }

    /// Negative acknowledgement for `seq` carrying `errno`
    pub fn nack(&self, seq: u32, errno: i32) -> Result<()> {
        self.inject(encode_ack(seq, errno, self.port))
    }

    /// Multipart terminator for `seq`
    pub fn done(&self, seq: u32) -> Result<()> {
        self.inject(encode_done(seq, self.port))
    }

    /// Drop the inbound channel; the host's next receive reports `Closed`
    pub fn disconnect(&mut self) {
        self.inject = None;
    }

    /// Whether the host closed its side
    pub fn host_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
