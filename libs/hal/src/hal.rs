//! # WifiHal - Submission API
//!
//! ## Purpose
//!
//! Owns one control socket connection: the transport, the correlation
//! registry, and the receive loop thread. Callers submit commands and block
//! for their reply, or subscribe and receive events on the loop thread until
//! they cancel.
//!
//! ```text
//!   submit(cmd)    → register → send → block ─┐
//!                                             ├── Receive Loop completes
//!   subscribe(cmd) → register → send → handle │   or dispatches events
//!   cancel(id)     → unregister → disable ────┘
//! ```
//!
//! Registration always happens before the send, so a reply can never race
//! ahead of its registration.
//!
//! ## Lifecycle
//!
//! `initialize` spawns the loop and resolves the family id when none is
//! configured. `cleanup` (also run on drop) releases every blocked caller
//! with `Uninitialized`, stops the loop and closes the transport; every later
//! call fails with `Uninitialized`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use wlctl_codec::MacAddr;
use wlctl_config::HalConfig;
use wlctl_network::{Transport, TransportInfo};

use crate::command::{Command, CommandKind, CommandState, RequestContext, RequestId, ResultHandler, SubscriptionKey};
use crate::commands::{
    GetCapabilities, HotlistCommand, ResolveFamily, ScanCapabilities, ScanCommand, ScanParams,
    SignificantChangeCommand,
};
use crate::error::{HalError, HalResult};
use crate::event_loop::ReceiveLoop;
use crate::registry::{CorrelationRegistry, PendingRequest, Subscription};

/// Caller's view of a registered subscription
///
/// Dispatched events raise a single coalescing flag here, after their handler
/// returned. Several events between two observations read as one.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: RequestId,
    key: SubscriptionKey,
    events: Receiver<()>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    /// Wait up to `timeout` for an event dispatched since the last observation
    pub fn wait_event(&self, timeout: Duration) -> bool {
        self.events.recv_timeout(timeout).is_ok()
    }

    pub fn try_event(&self) -> bool {
        self.events.try_recv().is_ok()
    }

    /// 1 if events were dispatched since the last observation, else 0
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}

/// One connection to the wireless control family
pub struct WifiHal {
    config: HalConfig,
    registry: Arc<CorrelationRegistry>,
    transport: Arc<dyn Transport>,
    /// Serializes writes to the socket
    send_lock: Mutex<()>,
    context: RwLock<RequestContext>,
    shutdown: Arc<AtomicBool>,
    next_internal: AtomicU32,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl WifiHal {
    /// Start the receive loop over `transport` and resolve the family id
    pub fn initialize<T: Transport + 'static>(config: HalConfig, transport: T) -> HalResult<Self> {
        Self::with_transport(config, Arc::new(transport))
    }

    /// Open the kernel control socket and initialize over it
    #[cfg(target_os = "linux")]
    pub fn initialize_netlink(config: HalConfig) -> HalResult<Self> {
        use wlctl_network::{NetlinkConfig, NetlinkTransport};

        let transport = NetlinkTransport::open(NetlinkConfig {
            recv_buffer_size: config.recv_buffer_size,
            max_message_size: config.max_message_size,
            groups: config.multicast_groups,
            memberships: config.multicast_memberships.clone(),
            socket_rcvbuf: None,
        })
        .map_err(|e| {
            error!(error = %e, "Failed to open control socket");
            HalError::TransportFailure
        })?;
        Self::initialize(config, transport)
    }

    pub fn with_transport(config: HalConfig, transport: Arc<dyn Transport>) -> HalResult<Self> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Rejecting HAL configuration");
            return Err(HalError::InvalidArgument);
        }

        let registry = Arc::new(CorrelationRegistry::new(
            config.max_live_commands,
            config.max_event_subscriptions,
        ));
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = ReceiveLoop::new(
            registry.clone(),
            transport.clone(),
            shutdown.clone(),
            Duration::from_millis(config.poll_interval_ms),
        )
        .spawn()
        .map_err(|e| {
            error!(error = %e, "Failed to spawn receive loop");
            HalError::Unknown
        })?;

        let context = RequestContext {
            family_id: config.family_id.unwrap_or(0),
            interface_index: config.interface_index,
            max_message_size: config.max_message_size,
        };
        let hal = Self {
            config,
            registry,
            transport,
            send_lock: Mutex::new(()),
            context: RwLock::new(context),
            shutdown,
            next_internal: AtomicU32::new(1),
            receiver: Mutex::new(Some(handle)),
        };

        if hal.config.family_id.is_none() {
            let name = hal.config.family_name.clone();
            let family_id = hal.resolve_family(&name)?;
            hal.context.write().family_id = family_id;
        }

        info!(
            family_id = hal.family_id(),
            max_live_commands = hal.registry.command_capacity(),
            max_event_subscriptions = hal.registry.event_capacity(),
            "HAL initialized"
        );
        Ok(hal)
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    pub fn family_id(&self) -> u16 {
        self.context.read().family_id
    }

    pub fn is_initialized(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }

    pub fn transport_info(&self) -> TransportInfo {
        self.transport.transport_info()
    }

    /// Live commands currently awaiting completion
    pub fn live_commands(&self) -> usize {
        self.registry.command_count()
    }

    /// Event subscriptions currently registered
    pub fn subscriptions(&self) -> usize {
        self.registry.event_count()
    }

    fn context(&self) -> RequestContext {
        self.context.read().clone()
    }

    fn ensure_initialized(&self) -> HalResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(HalError::Uninitialized)
        }
    }

    fn internal_id(&self) -> RequestId {
        RequestId::internal(self.next_internal.fetch_add(1, Ordering::Relaxed))
    }

    fn send(&self, message: &[u8]) -> HalResult<()> {
        let _guard = self.send_lock.lock();
        self.transport.send(message).map_err(|e| {
            warn!(error = %e, len = message.len(), "Send failed");
            HalError::TransportFailure
        })
    }

    /// Send a command and block until its reply completes
    ///
    /// Returns the command with its decoded reply. The command's id must not
    /// be in use by another live command or subscription.
    pub fn submit(&self, mut command: Command) -> HalResult<Command> {
        self.ensure_initialized()?;
        let id = command.id();

        let message = command.build_request(&self.context())?;
        command.set_state(CommandState::Sent);
        command.set_state(CommandState::AwaitingReply);

        let command = Arc::new(Mutex::new(command));
        let (completion, outcome) = bounded(1);
        self.registry
            .register_command(id, PendingRequest::new(command.clone(), completion))?;

        debug!(%id, len = message.len(), "Submitting command");
        if let Err(e) = self.send(message.as_bytes()) {
            // Already released by a concurrent cancel or shutdown otherwise
            if self.registry.unregister_command(id).is_some() {
                return Err(e);
            }
        }

        outcome.recv().unwrap_or(Err(HalError::Unknown))?;

        Arc::try_unwrap(command)
            .map(Mutex::into_inner)
            .map_err(|_| {
                warn!(%id, "Command still referenced after completion");
                HalError::Unknown
            })
    }

    /// Register `command` for events under `key` and send its request
    ///
    /// Returns once the request is written; events are delivered to the
    /// command's handler on the receive loop thread until cancelled. A
    /// subscription already registered under `key` is replaced, unless the
    /// send fails, in which case it stays registered.
    pub fn subscribe(&self, command: Command, key: SubscriptionKey) -> HalResult<SubscriptionHandle> {
        self.ensure_initialized()?;
        if !command.supports_events() {
            return Err(HalError::NotSupported);
        }
        if !key.is_valid() {
            return Err(HalError::InvalidArgument);
        }

        let id = command.id();
        let message = command.build_request(&self.context())?;
        let (signal, events) = bounded(1);
        let subscription = Arc::new(Subscription::new(key, command, signal));
        let replaced = self.registry.register_event(subscription)?;

        debug!(%id, %key, "Subscribing");
        if let Err(e) = self.send(message.as_bytes()) {
            if let Some(subscription) = self.registry.unregister_event_for(key, id) {
                subscription.detach();
            }
            // The kernel never saw the replacement, so the previous one stands
            if let Some(previous) = replaced {
                if !self.registry.restore_event(previous.clone(), id) {
                    warn!(%key, previous = %previous.id(), "Could not restore replaced subscription");
                    previous.detach();
                }
            }
            return Err(e);
        }

        if let Some(previous) = replaced {
            previous.detach();
        }
        Ok(SubscriptionHandle { id, key, events })
    }

    /// Subscribe under the command's natural event key
    fn subscribe_natural(&self, command: Command) -> HalResult<SubscriptionHandle> {
        let key = command.event_key().ok_or(HalError::NotSupported)?;
        self.subscribe(command, key)
    }

    pub fn cancel(&self, handle: &SubscriptionHandle) -> HalResult<()> {
        self.cancel_request(handle.id())
    }

    /// Cancel a live command or subscription by id
    ///
    /// A blocked `submit` returns `Unknown`. A subscription stops receiving
    /// events before this returns and the far end is told to stop on a
    /// best-effort basis. Cancelling an unknown id succeeds.
    pub fn cancel_request(&self, id: RequestId) -> HalResult<()> {
        self.ensure_initialized()?;

        if let Some(pending) = self.registry.unregister_command(id) {
            info!(%id, "Cancelling outstanding command");
            pending.complete(Err(HalError::Unknown));
            return Ok(());
        }

        let Some(subscription) = self.registry.remove_subscription(id) else {
            debug!(%id, "Nothing registered to cancel");
            return Ok(());
        };
        info!(%id, key = %subscription.key(), "Cancelling subscription");

        match subscription.cancel(&self.context()) {
            Some(Ok(message)) => {
                if let Err(e) = self.send(message.as_bytes()) {
                    warn!(%id, error = %e, "Failed to send disable message");
                }
            }
            Some(Err(e)) => warn!(%id, error = %e, "Failed to build disable message"),
            None => {}
        }
        Ok(())
    }

    /// Look up a family id through the controller
    pub fn resolve_family(&self, name: &str) -> HalResult<u16> {
        let command = Command::new(self.internal_id(), ResolveFamily::new(name));
        match self.submit(command)?.into_kind() {
            CommandKind::ResolveFamily(resolved) => resolved.family_id().ok_or_else(|| {
                warn!(family = name, "Family resolution returned no id");
                HalError::Unknown
            }),
            _ => Err(HalError::Unknown),
        }
    }

    /// Query the driver's scan limits
    ///
    /// A malformed reply yields all-zero limits.
    pub fn capabilities(&self) -> HalResult<ScanCapabilities> {
        let command = Command::new(self.internal_id(), GetCapabilities::new());
        match self.submit(command)?.into_kind() {
            CommandKind::Capabilities(query) => Ok(query.capabilities().unwrap_or_default()),
            _ => Err(HalError::Unknown),
        }
    }

    pub fn start_scan(
        &self,
        id: RequestId,
        params: ScanParams,
        handler: ResultHandler,
    ) -> HalResult<SubscriptionHandle> {
        let scan = ScanCommand::new(params, handler)?;
        self.subscribe_natural(Command::new(id, scan))
    }

    pub fn stop_scan(&self, id: RequestId) -> HalResult<()> {
        self.cancel_request(id)
    }

    pub fn set_bssid_hotlist(
        &self,
        id: RequestId,
        bssids: Vec<MacAddr>,
        handler: ResultHandler,
    ) -> HalResult<SubscriptionHandle> {
        self.subscribe_natural(Command::new(id, HotlistCommand::new(bssids, handler)))
    }

    pub fn reset_bssid_hotlist(&self, id: RequestId) -> HalResult<()> {
        self.cancel_request(id)
    }

    pub fn set_significant_change_handler(
        &self,
        id: RequestId,
        handler: ResultHandler,
    ) -> HalResult<SubscriptionHandle> {
        self.subscribe_natural(Command::new(id, SignificantChangeCommand::new(handler)))
    }

    pub fn reset_significant_change_handler(&self, id: RequestId) -> HalResult<()> {
        self.cancel_request(id)
    }

    /// Release every caller, stop the receive loop and close the transport
    pub fn cleanup(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Cleaning up HAL");

        self.registry
            .close(HalError::Uninitialized)
            .release(HalError::Uninitialized);

        if let Some(handle) = self.receiver.lock().take() {
            if handle.thread().id() == thread::current().id() {
                warn!("Cleanup called from the receive loop, not joining it");
            } else if handle.join().is_err() {
                error!("Receive loop panicked");
            }
        }

        self.transport.close();
        info!("HAL stopped");
    }
}

impl Drop for WifiHal {
    fn drop(&mut self) {
        self.cleanup();
    }
}
