//! # Correlation Registry - Live Commands and Event Subscriptions
//!
//! ## Purpose
//!
//! Two bounded tables shared by every command on one connection:
//!
//! ```text
//!   live commands:  RequestId        → PendingRequest  (blocked caller)
//!   subscriptions:  SubscriptionKey  → Subscription    (indefinite events)
//! ```
//!
//! Both tables sit behind one registry-wide lock, held only for the table
//! edit itself and never across a blocking wait or a callback. Insertion
//! past capacity fails with `OutOfCapacity`; nothing is ever evicted.
//!
//! ## Ownership
//!
//! A registration owns its command for exactly the registration's lifetime.
//! Removing the entry hands the command back (live commands) or marks it
//! cancelled under its own lock (subscriptions), so the receive loop can
//! never dispatch into a command that its owner has already dropped.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, warn};
use wlctl_codec::{IncomingMessage, OutboundMessage};

use crate::command::{Command, CommandState, RequestContext, RequestId, SubscriptionKey};
use crate::error::{HalError, HalResult};

/// A caller blocked waiting for its command to complete
#[derive(Debug)]
pub struct PendingRequest {
    command: Arc<Mutex<Command>>,
    completion: Sender<HalResult<()>>,
    responded: bool,
}

impl PendingRequest {
    pub fn new(command: Arc<Mutex<Command>>, completion: Sender<HalResult<()>>) -> Self {
        Self {
            command,
            completion,
            responded: false,
        }
    }

    /// Release the waiting caller with `outcome`
    ///
    /// The registry's reference to the command is dropped before the caller
    /// wakes, so the caller holds the only reference once it returns.
    pub fn complete(self, outcome: HalResult<()>) {
        let Self {
            command,
            completion,
            ..
        } = self;
        command.lock().set_state(match outcome {
            Ok(()) => CommandState::Completed,
            Err(_) => CommandState::Cancelled,
        });
        drop(command);
        // The caller may have given up waiting already
        let _ = completion.send(outcome);
    }
}

#[derive(Debug)]
struct SubscriptionState {
    command: Command,
    cancelled: bool,
}

/// A registered event subscription
#[derive(Debug)]
pub struct Subscription {
    id: RequestId,
    key: SubscriptionKey,
    state: Mutex<SubscriptionState>,
    signal: Sender<()>,
}

impl Subscription {
    pub fn new(key: SubscriptionKey, mut command: Command, signal: Sender<()>) -> Self {
        command.set_state(CommandState::AwaitingEvents);
        Self {
            id: command.id(),
            key,
            state: Mutex::new(SubscriptionState {
                command,
                cancelled: false,
            }),
            signal,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Deliver one event; returns false if the subscription was cancelled
    pub fn dispatch(&self, event: &IncomingMessage<'_>) -> bool {
        let mut state = self.state.lock();
        if state.cancelled {
            return false;
        }
        state.command.handle_event(event);
        // Coalesces: a full signal already tells the caller something arrived
        let _ = self.signal.try_send(());
        true
    }

    /// Mark cancelled and build the far end's disable message, if any
    ///
    /// Waits for an in-progress dispatch to finish. A second cancel builds
    /// nothing.
    pub fn cancel(&self, ctx: &RequestContext) -> Option<HalResult<OutboundMessage>> {
        let mut state = self.state.lock();
        if state.cancelled {
            return None;
        }
        state.cancelled = true;
        state.command.set_state(CommandState::Cancelled);
        state.command.cancel_request(ctx)
    }

    /// Mark cancelled without notifying the far end
    pub fn detach(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        state.command.set_state(CommandState::Cancelled);
    }
}

#[derive(Debug, Default)]
struct Tables {
    commands: HashMap<RequestId, PendingRequest>,
    events: HashMap<SubscriptionKey, Arc<Subscription>>,
    /// Set once the connection is gone; every registration fails with it
    closed: Option<HalError>,
}

impl Tables {
    fn id_in_use(&self, id: RequestId) -> bool {
        self.commands.contains_key(&id) || self.events.values().any(|s| s.id == id)
    }
}

/// Everything left registered when the registry closed
#[derive(Debug, Default)]
pub struct Drained {
    pub commands: Vec<PendingRequest>,
    pub subscriptions: Vec<Arc<Subscription>>,
}

impl Drained {
    /// Wake every blocked caller with `reason` and stop every subscription
    pub fn release(self, reason: HalError) {
        if !self.commands.is_empty() || !self.subscriptions.is_empty() {
            debug!(
                commands = self.commands.len(),
                subscriptions = self.subscriptions.len(),
                %reason,
                "Releasing registrations"
            );
        }
        for pending in self.commands {
            pending.complete(Err(reason));
        }
        for subscription in self.subscriptions {
            subscription.detach();
        }
    }
}

/// Bounded tables correlating inbound traffic with its owner
#[derive(Debug)]
pub struct CorrelationRegistry {
    tables: Mutex<Tables>,
    command_capacity: usize,
    event_capacity: usize,
}

impl CorrelationRegistry {
    pub fn new(command_capacity: usize, event_capacity: usize) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            command_capacity,
            event_capacity,
        }
    }

    pub fn command_capacity(&self) -> usize {
        self.command_capacity
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    pub fn command_count(&self) -> usize {
        self.tables.lock().commands.len()
    }

    pub fn event_count(&self) -> usize {
        self.tables.lock().events.len()
    }

    /// Reason registrations are refused, once closed
    pub fn closed_reason(&self) -> Option<HalError> {
        self.tables.lock().closed
    }

    /// Register a live command under its request id
    pub fn register_command(&self, id: RequestId, pending: PendingRequest) -> HalResult<()> {
        let mut tables = self.tables.lock();
        if let Some(reason) = tables.closed {
            return Err(reason);
        }
        if tables.id_in_use(id) {
            warn!(%id, "Request id already registered");
            return Err(HalError::InvalidArgument);
        }
        if tables.commands.len() >= self.command_capacity {
            warn!(%id, capacity = self.command_capacity, "Live command table full");
            return Err(HalError::OutOfCapacity);
        }
        tables.commands.insert(id, pending);
        Ok(())
    }

    pub fn unregister_command(&self, id: RequestId) -> Option<PendingRequest> {
        self.tables.lock().commands.remove(&id)
    }

    pub fn find_command(&self, id: RequestId) -> Option<Arc<Mutex<Command>>> {
        self.tables
            .lock()
            .commands
            .get(&id)
            .map(|p| p.command.clone())
    }

    /// Claim the single reply a live command may consume
    ///
    /// Returns `None` for unknown ids and for every reply after the first.
    pub fn claim_response(&self, id: RequestId) -> Option<Arc<Mutex<Command>>> {
        let mut tables = self.tables.lock();
        let pending = tables.commands.get_mut(&id)?;
        if pending.responded {
            debug!(%id, "Ignoring additional reply");
            return None;
        }
        pending.responded = true;
        Some(pending.command.clone())
    }

    /// Register a subscription, replacing any existing one with the same key
    ///
    /// Returns the replaced subscription; the caller must mark it cancelled.
    pub fn register_event(&self, subscription: Arc<Subscription>) -> HalResult<Option<Arc<Subscription>>> {
        let key = subscription.key;
        if !key.is_valid() {
            return Err(HalError::InvalidArgument);
        }

        let mut tables = self.tables.lock();
        if let Some(reason) = tables.closed {
            return Err(reason);
        }
        let replacing = tables.events.get(&key).map(|s| s.id);
        if tables.commands.contains_key(&subscription.id)
            || tables
                .events
                .values()
                .any(|s| s.id == subscription.id && s.key != key)
        {
            warn!(id = %subscription.id, "Request id already registered");
            return Err(HalError::InvalidArgument);
        }
        if replacing.is_none() && tables.events.len() >= self.event_capacity {
            warn!(%key, capacity = self.event_capacity, "Event subscription table full");
            return Err(HalError::OutOfCapacity);
        }

        let replaced = tables.events.insert(key, subscription);
        if let Some(old) = &replaced {
            warn!(%key, old = %old.id, "Replacing existing subscription");
        }
        Ok(replaced)
    }

    pub fn unregister_event(&self, key: SubscriptionKey) -> Option<Arc<Subscription>> {
        self.tables.lock().events.remove(&key)
    }

    /// Remove the subscription under `key` only if it still belongs to `id`
    pub fn unregister_event_for(&self, key: SubscriptionKey, id: RequestId) -> Option<Arc<Subscription>> {
        let mut tables = self.tables.lock();
        match tables.events.get(&key) {
            Some(existing) if existing.id == id => tables.events.remove(&key),
            _ => None,
        }
    }

    /// Put `previous` back under its key if `failed` still holds it
    ///
    /// Undoes a replacement whose enable message never reached the kernel.
    /// Returns false, leaving the table untouched, when the slot moved on.
    pub fn restore_event(&self, previous: Arc<Subscription>, failed: RequestId) -> bool {
        let key = previous.key;
        let mut tables = self.tables.lock();
        if tables.closed.is_some() {
            return false;
        }
        match tables.events.get(&key) {
            Some(current) if current.id == failed => {}
            None => {}
            Some(_) => return false,
        }
        tables.events.remove(&key);
        if tables.id_in_use(previous.id) || tables.events.len() >= self.event_capacity {
            return false;
        }
        tables.events.insert(key, previous);
        true
    }

    pub fn find_event(&self, key: SubscriptionKey) -> Option<Arc<Subscription>> {
        self.tables.lock().events.get(&key).cloned()
    }

    pub fn find_subscription(&self, id: RequestId) -> Option<Arc<Subscription>> {
        self.tables
            .lock()
            .events
            .values()
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn remove_subscription(&self, id: RequestId) -> Option<Arc<Subscription>> {
        let mut tables = self.tables.lock();
        let key = tables.events.values().find(|s| s.id == id).map(|s| s.key)?;
        tables.events.remove(&key)
    }

    /// Subscriptions matching a notification
    ///
    /// Looked up by command code first, then by vendor id and sub-command.
    pub fn subscriptions_for(&self, event: &IncomingMessage<'_>) -> Vec<Arc<Subscription>> {
        let tables = self.tables.lock();
        let by_command = event
            .command()
            .and_then(|cmd| tables.events.get(&SubscriptionKey::command(cmd)));
        let matched = by_command.or_else(|| {
            let vendor_id = event.vendor_id()?;
            let subcmd = event.vendor_subcommand()?;
            tables.events.get(&SubscriptionKey::vendor(vendor_id, subcmd))
        });
        matched.into_iter().cloned().collect()
    }

    /// Refuse further registrations and hand back everything registered
    ///
    /// A later close only replaces the reason.
    pub fn close(&self, reason: HalError) -> Drained {
        let mut tables = self.tables.lock();
        tables.closed = Some(reason);
        Drained {
            commands: tables.commands.drain().map(|(_, p)| p).collect(),
            subscriptions: tables.events.drain().map(|(_, s)| s).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ResultHandler;
    use crate::commands::{GetCapabilities, ScanCommand, ScanParams};
    use crossbeam_channel::bounded;

    fn id(n: u32) -> RequestId {
        RequestId::new(n).unwrap()
    }

    fn pending(n: u32) -> PendingRequest {
        let (tx, _rx) = bounded(1);
        let command = Command::new(id(n), GetCapabilities::new());
        PendingRequest::new(Arc::new(Mutex::new(command)), tx)
    }

    fn subscription(n: u32, key: SubscriptionKey) -> Arc<Subscription> {
        let (tx, _rx) = bounded(1);
        let scan = ScanCommand::new(ScanParams::default(), ResultHandler::new(|_, _| {})).unwrap();
        Arc::new(Subscription::new(key, Command::new(id(n), scan), tx))
    }

    #[test]
    fn test_event_capacity_is_enforced() {
        let registry = CorrelationRegistry::new(4, 3);
        for n in 1..=3u32 {
            registry
                .register_event(subscription(n, SubscriptionKey::command(n as u8)))
                .unwrap();
        }

        let overflow = registry.register_event(subscription(4, SubscriptionKey::command(4)));
        assert_eq!(overflow.unwrap_err(), HalError::OutOfCapacity);
        assert_eq!(registry.event_count(), 3);
        for n in 1..=3u32 {
            let found = registry.find_event(SubscriptionKey::command(n as u8)).unwrap();
            assert_eq!(found.id(), id(n));
        }
    }

    #[test]
    fn test_replacing_a_key_does_not_count_against_capacity() {
        let registry = CorrelationRegistry::new(4, 1);
        let key = SubscriptionKey::command(34);
        registry.register_event(subscription(1, key)).unwrap();

        let replaced = registry.register_event(subscription(2, key)).unwrap();
        assert_eq!(replaced.map(|s| s.id()), Some(id(1)));
        assert_eq!(registry.find_event(key).map(|s| s.id()), Some(id(2)));
    }

    #[test]
    fn test_command_capacity_and_duplicates() {
        let registry = CorrelationRegistry::new(2, 2);
        registry.register_command(id(1), pending(1)).unwrap();
        assert_eq!(
            registry.register_command(id(1), pending(1)).unwrap_err(),
            HalError::InvalidArgument
        );
        registry.register_command(id(2), pending(2)).unwrap();
        assert_eq!(
            registry.register_command(id(3), pending(3)).unwrap_err(),
            HalError::OutOfCapacity
        );
        assert!(registry.find_command(id(1)).is_some());
    }

    #[test]
    fn test_ids_unique_across_tables() {
        let registry = CorrelationRegistry::new(2, 2);
        registry.register_command(id(5), pending(5)).unwrap();
        let clash = registry.register_event(subscription(5, SubscriptionKey::command(34)));
        assert_eq!(clash.unwrap_err(), HalError::InvalidArgument);
    }

    #[test]
    fn test_only_first_reply_is_claimed() {
        let registry = CorrelationRegistry::new(2, 2);
        registry.register_command(id(1), pending(1)).unwrap();
        assert!(registry.claim_response(id(1)).is_some());
        assert!(registry.claim_response(id(1)).is_none());
        assert!(registry.claim_response(id(9)).is_none());
    }

    #[test]
    fn test_command_and_vendor_forms_are_disjoint() {
        let registry = CorrelationRegistry::new(2, 2);
        registry
            .register_event(subscription(1, SubscriptionKey::vendor(0x1A11, 5)))
            .unwrap();
        assert!(registry.unregister_event(SubscriptionKey::command(5)).is_none());
        assert!(registry.unregister_event_for(SubscriptionKey::vendor(0x1A11, 5), id(2)).is_none());
        assert!(registry.unregister_event_for(SubscriptionKey::vendor(0x1A11, 5), id(1)).is_some());
    }

    #[test]
    fn test_vendor_envelope_key_rejected() {
        let registry = CorrelationRegistry::new(2, 2);
        let key = SubscriptionKey::command(wlctl_codec::constants::nl80211::CMD_VENDOR);
        assert_eq!(
            registry.register_event(subscription(1, key)).unwrap_err(),
            HalError::InvalidArgument
        );
    }

    #[test]
    fn test_close_drains_and_refuses() {
        let registry = CorrelationRegistry::new(2, 2);
        registry.register_command(id(1), pending(1)).unwrap();
        registry
            .register_event(subscription(2, SubscriptionKey::command(34)))
            .unwrap();

        let drained = registry.close(HalError::Uninitialized);
        assert_eq!(drained.commands.len(), 1);
        assert_eq!(drained.subscriptions.len(), 1);
        assert_eq!(
            registry.register_command(id(3), pending(3)).unwrap_err(),
            HalError::Uninitialized
        );
    }

    #[test]
    fn test_cancelled_subscription_never_dispatches() {
        let ctx = RequestContext {
            family_id: 0x1c,
            interface_index: None,
            max_message_size: 4096,
        };
        let sub = subscription(1, SubscriptionKey::command(34));
        let bytes = wlctl_codec::MessageBuilder::new(0x1c, 34)
            .unwrap()
            .build()
            .unwrap()
            .into_bytes();
        let event = IncomingMessage::parse_from(&bytes).unwrap();

        assert!(sub.dispatch(&event));
        assert!(sub.cancel(&ctx).is_some());
        assert!(sub.cancel(&ctx).is_none());
        assert!(!sub.dispatch(&event));
    }

    #[test]
    fn test_failed_replacement_restores_previous() {
        let registry = CorrelationRegistry::new(2, 1);
        let key = SubscriptionKey::command(34);
        let previous = subscription(1, key);
        registry.register_event(previous.clone()).unwrap();

        let replaced = registry.register_event(subscription(2, key)).unwrap().unwrap();
        assert_eq!(replaced.id(), id(1));
        assert!(registry.unregister_event_for(key, id(2)).is_some());

        assert!(registry.restore_event(replaced, id(2)));
        assert_eq!(registry.find_event(key).map(|s| s.id()), Some(id(1)));
        assert_eq!(registry.event_count(), 1);
        assert!(!previous.is_cancelled());
    }

    #[test]
    fn test_restore_leaves_newer_subscription_alone() {
        let registry = CorrelationRegistry::new(2, 2);
        let key = SubscriptionKey::command(34);
        registry.register_event(subscription(3, key)).unwrap();

        assert!(!registry.restore_event(subscription(1, key), id(2)));
        assert_eq!(registry.find_event(key).map(|s| s.id()), Some(id(3)));
    }

    #[test]
    fn test_event_signal_coalesces() {
        let (tx, rx) = bounded(1);
        let scan = ScanCommand::new(ScanParams::default(), ResultHandler::new(|_, _| {})).unwrap();
        let sub = Subscription::new(SubscriptionKey::command(34), Command::new(id(1), scan), tx);
        let bytes = wlctl_codec::MessageBuilder::new(0x1c, 34)
            .unwrap()
            .build()
            .unwrap()
            .into_bytes();
        let event = IncomingMessage::parse_from(&bytes).unwrap();

        for _ in 0..1000 {
            assert!(sub.dispatch(&event));
        }
        assert_eq!(rx.len(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Subscribe(u32, u8),
            Unsubscribe(u8),
            Cancel(u32),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1u32..20, 30u8..40).prop_map(|(id, cmd)| Op::Subscribe(id, cmd)),
                (30u8..40).prop_map(Op::Unsubscribe),
                (1u32..20).prop_map(Op::Cancel),
            ]
        }

        proptest! {
            #[test]
            fn prop_tables_stay_bounded_and_ids_unique(
                capacity in 1usize..6,
                ops in prop::collection::vec(op(), 1..60),
            ) {
                let registry = CorrelationRegistry::new(capacity, capacity);
                for op in ops {
                    match op {
                        Op::Subscribe(n, cmd) => {
                            let _ = registry.register_event(subscription(n, SubscriptionKey::command(cmd)));
                        }
                        Op::Unsubscribe(cmd) => {
                            registry.unregister_event(SubscriptionKey::command(cmd));
                        }
                        Op::Cancel(n) => {
                            registry.remove_subscription(id(n));
                        }
                    }

                    prop_assert!(registry.event_count() <= capacity);
                    let mut ids: Vec<u32> = (30u8..40)
                        .filter_map(|cmd| registry.find_event(SubscriptionKey::command(cmd)))
                        .map(|s| s.id().get())
                        .collect();
                    let total = ids.len();
                    ids.sort_unstable();
                    ids.dedup();
                    prop_assert_eq!(ids.len(), total);
                }
            }
        }
    }
}
