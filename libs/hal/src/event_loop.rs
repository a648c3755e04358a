//! # Receive Loop - Single Reader of the Control Socket
//!
//! ## Purpose
//!
//! One dedicated thread reads the socket, splits each read into messages,
//! and routes every message to its owner:
//!
//! ```text
//!   ack / done (seq)        → complete live command, wake caller
//!   error (seq, errno)      → complete live command with TransportFailure
//!   data, seq != 0          → first reply goes to the live command
//!   data, seq == 0          → notification, routed by subscription key
//! ```
//!
//! Unmatched traffic is dropped with a log line. A handler that panics is
//! contained so the loop keeps serving every other command.
//!
//! ## Shutdown
//!
//! The loop wakes every poll interval to check the shutdown flag. If the
//! transport closes underneath it, the loop closes the registry with
//! `TransportFailure`, releasing every blocked caller, and exits.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};
use wlctl_codec::{frames, IncomingMessage, MessageKind};
use wlctl_network::{Transport, TransportError};

use crate::command::RequestId;
use crate::error::{HalError, HalResult};
use crate::registry::CorrelationRegistry;

/// Name of the receive loop thread
pub const LOOP_THREAD_NAME: &str = "wifi-event-loop";

/// Reader side of one connection
pub struct ReceiveLoop {
    registry: Arc<CorrelationRegistry>,
    transport: Arc<dyn Transport>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl ReceiveLoop {
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        transport: Arc<dyn Transport>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            shutdown,
            poll_interval,
        }
    }

    /// Start the loop on its own named thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(LOOP_THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    /// Read and dispatch until shutdown or transport close
    pub fn run(&self) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Receive loop started");

        while !self.shutdown.load(Ordering::Acquire) {
            match self.transport.receive_timeout(self.poll_interval) {
                Ok(Some(buf)) => self.process(&buf),
                Ok(None) => {}
                Err(TransportError::Overrun) => {
                    warn!("Receive buffer overrun, notifications were lost");
                }
                Err(e) if e.is_closed() => {
                    if !self.shutdown.load(Ordering::Acquire) {
                        error!(error = %e, "Control socket closed");
                        self.registry
                            .close(HalError::TransportFailure)
                            .release(HalError::TransportFailure);
                    }
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Receive failed");
                    thread::sleep(self.poll_interval);
                }
            }
        }

        info!("Receive loop stopped");
    }

    /// Dispatch every message packed into one socket read
    pub fn process(&self, buf: &[u8]) {
        for frame in frames(buf) {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.handle_frame(frame)));
            if outcome.is_err() {
                error!(len = frame.len(), "Handler panicked while processing message");
            }
        }
    }

    fn handle_frame(&self, frame: &[u8]) {
        let mut message = IncomingMessage::new(frame);
        if let Err(e) = message.parse() {
            warn!(error = %e, len = frame.len(), "Dropping malformed message");
            return;
        }
        message.log();

        let Ok(kind) = message.kind() else {
            return;
        };
        let seq = message.sequence().unwrap_or(0);

        match kind {
            MessageKind::Ack | MessageKind::Done => self.complete(seq, Ok(())),
            MessageKind::Error(errno) => {
                debug!(seq, errno, "Negative acknowledgement");
                self.complete(seq, Err(HalError::TransportFailure));
            }
            MessageKind::Noop => trace!(seq, "Noop"),
            MessageKind::Overrun => warn!(seq, "Kernel reported overrun"),
            MessageKind::Data => match RequestId::from_sequence(seq) {
                Some(id) => self.handle_reply(id, &message),
                None => self.handle_notification(&message),
            },
        }
    }

    /// Finish the live command `seq` refers to, if there is one
    fn complete(&self, seq: u32, outcome: HalResult<()>) {
        let Some(id) = RequestId::from_sequence(seq) else {
            debug!("Acknowledgement without sequence number");
            return;
        };

        if let Some(pending) = self.registry.unregister_command(id) {
            pending.complete(outcome);
        } else if self.registry.find_subscription(id).is_some() {
            match outcome {
                Ok(()) => debug!(%id, "Subscription request acknowledged"),
                Err(_) => warn!(%id, "Subscription request rejected by the kernel"),
            }
        } else {
            debug!(%id, "Acknowledgement for unknown request");
        }
    }

    fn handle_reply(&self, id: RequestId, reply: &IncomingMessage<'_>) {
        match self.registry.claim_response(id) {
            Some(command) => command.lock().handle_response(reply),
            None if self.registry.find_command(id).is_some() => {}
            None => debug!(%id, cmd = reply.command(), "Dropping stale reply"),
        }
    }

    fn handle_notification(&self, event: &IncomingMessage<'_>) {
        let subscriptions = self.registry.subscriptions_for(event);
        if subscriptions.is_empty() {
            debug!(
                cmd = event.command(),
                vendor_id = event.vendor_id(),
                subcmd = event.vendor_subcommand(),
                "No subscription for notification"
            );
            return;
        }
        for subscription in subscriptions {
            if !subscription.dispatch(event) {
                trace!(id = %subscription.id(), "Skipping cancelled subscription");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, ResultHandler, SubscriptionKey};
    use crate::commands::{ScanCommand, ScanParams, ScanResult};
    use crate::registry::{PendingRequest, Subscription};
    use crossbeam_channel::bounded;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use wlctl_codec::constants::nl80211;
    use wlctl_codec::{encode_ack, MessageBuilder};
    use wlctl_network::{memory_pair, MemoryConfig};

    const FAMILY: u16 = 0x1c;

    fn receive_loop(registry: Arc<CorrelationRegistry>) -> ReceiveLoop {
        let (transport, _device) = memory_pair(MemoryConfig::default());
        ReceiveLoop::new(
            registry,
            Arc::new(transport),
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(10),
        )
    }

    fn scan_notification(ssid: &str) -> Vec<u8> {
        let mut builder = MessageBuilder::new(FAMILY, nl80211::CMD_NEW_SCAN_RESULTS).unwrap();
        builder
            .nested(nl80211::ATTR_SCAN_SSIDS, |b| {
                b.put_string(1, ssid)?;
                Ok(())
            })
            .unwrap();
        builder.build().unwrap().into_bytes()
    }

    #[test]
    fn test_ack_completes_live_command() {
        let registry = Arc::new(CorrelationRegistry::new(4, 4));
        let id = RequestId::new(9).unwrap();
        let (tx, rx) = bounded(1);
        let scan = ScanCommand::new(ScanParams::default(), ResultHandler::new(|_, _| {})).unwrap();
        let command = Arc::new(Mutex::new(Command::new(id, scan)));
        registry
            .register_command(id, PendingRequest::new(command, tx))
            .unwrap();

        let lp = receive_loop(registry.clone());
        lp.process(&encode_ack(9, 0, 0));

        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert_eq!(registry.command_count(), 0);
    }

    #[test]
    fn test_nack_maps_to_transport_failure() {
        let registry = Arc::new(CorrelationRegistry::new(4, 4));
        let id = RequestId::new(3).unwrap();
        let (tx, rx) = bounded(1);
        let scan = ScanCommand::new(ScanParams::default(), ResultHandler::new(|_, _| {})).unwrap();
        registry
            .register_command(id, PendingRequest::new(Arc::new(Mutex::new(Command::new(id, scan))), tx))
            .unwrap();

        receive_loop(registry).process(&encode_ack(3, -22, 0));
        assert_eq!(rx.try_recv().unwrap(), Err(HalError::TransportFailure));
    }

    #[test]
    fn test_notification_routed_by_command() {
        let registry = Arc::new(CorrelationRegistry::new(4, 4));
        let seen = Arc::new(Mutex::new(Vec::<Vec<ScanResult>>::new()));
        let sink = seen.clone();
        let handler = ResultHandler::new(move |_, results| sink.lock().push(results.to_vec()));
        let id = RequestId::new(1).unwrap();
        let (signal, events) = bounded(1);
        let scan = ScanCommand::new(ScanParams::default(), handler).unwrap();
        registry
            .register_event(Arc::new(Subscription::new(
                SubscriptionKey::command(nl80211::CMD_NEW_SCAN_RESULTS),
                Command::new(id, scan),
                signal,
            )))
            .unwrap();

        let lp = receive_loop(registry);
        lp.process(&scan_notification("home"));

        assert_eq!(events.try_recv(), Ok(()));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0].ssid.as_deref(), Some("home"));
    }

    #[test]
    fn test_panicking_handler_does_not_stop_dispatch() {
        let registry = Arc::new(CorrelationRegistry::new(4, 4));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = ResultHandler::new(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("handler failure");
            }
        });
        let (signal, _events) = bounded(1);
        let scan = ScanCommand::new(ScanParams::default(), handler).unwrap();
        registry
            .register_event(Arc::new(Subscription::new(
                SubscriptionKey::command(nl80211::CMD_NEW_SCAN_RESULTS),
                Command::new(RequestId::new(1).unwrap(), scan),
                signal,
            )))
            .unwrap();

        let lp = receive_loop(registry);
        let mut packed = scan_notification("a");
        packed.extend_from_slice(&scan_notification("b"));
        lp.process(&packed);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unmatched_traffic_is_dropped() {
        let registry = Arc::new(CorrelationRegistry::new(4, 4));
        let lp = receive_loop(registry.clone());

        lp.process(&encode_ack(77, 0, 0));
        lp.process(&scan_notification("nobody"));
        lp.process(&[0xff; 7]);

        assert_eq!(registry.command_count(), 0);
        assert_eq!(registry.event_count(), 0);
    }
}
