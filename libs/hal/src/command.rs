//! # Commands - Unit of Work Over the Control Socket
//!
//! ## Purpose
//!
//! A [`Command`] pairs a caller-assigned [`RequestId`] with one of a closed
//! set of concrete command kinds. Each kind builds its request, decodes its
//! reply or events, and optionally builds a "disable" message used when
//! its subscription is cancelled.
//!
//! ## Lifecycle
//!
//! ```text
//! Created → Sent → AwaitingReply  → Completed
//!               ↘ AwaitingEvents ↘ Cancelled
//! ```
//!
//! The issuing thread moves a command to `Sent` and `Awaiting*`; the receive
//! loop moves it to `Completed`; only an explicit cancel reaches `Cancelled`.

use std::fmt;
use std::sync::Arc;

use wlctl_codec::constants::nl80211;
use wlctl_codec::{IncomingMessage, MessageBuilder, OutboundMessage};

use crate::commands::{
    GetCapabilities, HotlistCommand, ResolveFamily, ScanCommand, ScanResult,
    SignificantChangeCommand,
};
use crate::error::{HalError, HalResult};

/// Request ids at or above this value are reserved for commands the HAL
/// issues on its own behalf
pub const INTERNAL_ID_BASE: u32 = 0x8000_0000;

/// Caller-chosen correlation number carried in the message sequence field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u32);

impl RequestId {
    /// Validate a caller-assigned id; 0 and the internal range are rejected
    pub fn new(id: u32) -> HalResult<Self> {
        if id == 0 || id >= INTERNAL_ID_BASE {
            return Err(HalError::InvalidArgument);
        }
        Ok(Self(id))
    }

    pub(crate) const fn internal(offset: u32) -> Self {
        Self(INTERNAL_ID_BASE | (offset & !INTERNAL_ID_BASE))
    }

    /// Wrap a sequence number read off the wire
    pub(crate) fn from_sequence(seq: u32) -> Option<Self> {
        (seq != 0).then_some(Self(seq))
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Routing key for unsolicited notifications
///
/// The two forms never match each other: a vendor notification is only
/// delivered to a `Vendor` subscription with the same id and sub-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// Plain command code
    Command(u8),
    /// Vendor id and vendor sub-command
    Vendor { vendor_id: u32, subcmd: u32 },
}

impl SubscriptionKey {
    pub const fn command(cmd: u8) -> Self {
        Self::Command(cmd)
    }

    pub const fn vendor(vendor_id: u32, subcmd: u32) -> Self {
        Self::Vendor { vendor_id, subcmd }
    }

    /// Keys under which a subscription may be registered
    ///
    /// The vendor envelope command alone is too coarse to route on.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Command(nl80211::CMD_VENDOR))
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(cmd) => write!(f, "cmd {}", cmd),
            Self::Vendor { vendor_id, subcmd } => {
                write!(f, "vendor {:#08x}/{:#x}", vendor_id, subcmd)
            }
        }
    }
}

/// Command lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Created,
    Sent,
    AwaitingReply,
    AwaitingEvents,
    Completed,
    Cancelled,
}

/// Connection parameters a command needs to build its messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Resolved family id of the wireless control family
    pub family_id: u16,
    pub interface_index: Option<u32>,
    pub max_message_size: usize,
}

impl RequestContext {
    /// Start a plain request for the wireless family
    pub fn request(&self, cmd: u8) -> HalResult<MessageBuilder> {
        Ok(MessageBuilder::with_max_size(
            self.family_id,
            cmd,
            self.max_message_size,
        )?)
    }

    /// Start a vendor request, addressed to the interface when one is configured
    pub fn vendor_request(&self, vendor_id: u32, subcmd: u32) -> HalResult<MessageBuilder> {
        let mut builder = MessageBuilder::vendor_with_max_size(
            self.family_id,
            vendor_id,
            subcmd,
            self.max_message_size,
        )?;
        if let Some(ifindex) = self.interface_index {
            builder.put_u32(nl80211::ATTR_IFINDEX, ifindex)?;
        }
        Ok(builder)
    }

    /// Interface index, required by per-interface commands
    pub fn require_interface(&self) -> HalResult<u32> {
        self.interface_index.ok_or(HalError::InvalidArgument)
    }
}

/// Behaviour every concrete command provides
pub trait CommandHandler {
    /// Build the message that starts this command
    fn build_request(&self, ctx: &RequestContext) -> HalResult<OutboundMessage>;

    /// Decode the synchronous reply; missing attributes are skipped
    fn handle_response(&mut self, _reply: &IncomingMessage<'_>) {}

    /// Decode one notification delivered to this command's subscription
    fn handle_event(&mut self, _id: RequestId, _event: &IncomingMessage<'_>) {}

    /// Natural subscription key for event-mode commands
    fn event_key(&self) -> Option<SubscriptionKey> {
        None
    }

    /// Message telling the far end to stop, sent when the subscription is cancelled
    fn cancel_request(&self, _ctx: &RequestContext) -> Option<HalResult<OutboundMessage>> {
        None
    }

    fn supports_events(&self) -> bool {
        self.event_key().is_some()
    }
}

/// Callback receiving decoded results on the receive loop thread
///
/// Runs synchronously inside the loop; it must not block.
#[derive(Clone)]
pub struct ResultHandler(Arc<dyn Fn(RequestId, &[ScanResult]) + Send + Sync>);

impl ResultHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(RequestId, &[ScanResult]) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, id: RequestId, results: &[ScanResult]) {
        (self.0)(id, results)
    }
}

impl fmt::Debug for ResultHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResultHandler")
    }
}

/// Closed set of concrete commands
#[derive(Debug)]
pub enum CommandKind {
    Capabilities(GetCapabilities),
    ResolveFamily(ResolveFamily),
    Scan(ScanCommand),
    Hotlist(HotlistCommand),
    SignificantChange(SignificantChangeCommand),
}

macro_rules! dispatch {
    ($kind:expr, $cmd:ident => $body:expr) => {
        match $kind {
            CommandKind::Capabilities($cmd) => $body,
            CommandKind::ResolveFamily($cmd) => $body,
            CommandKind::Scan($cmd) => $body,
            CommandKind::Hotlist($cmd) => $body,
            CommandKind::SignificantChange($cmd) => $body,
        }
    };
}

impl CommandHandler for CommandKind {
    fn build_request(&self, ctx: &RequestContext) -> HalResult<OutboundMessage> {
        dispatch!(self, c => c.build_request(ctx))
    }

    fn handle_response(&mut self, reply: &IncomingMessage<'_>) {
        dispatch!(self, c => c.handle_response(reply))
    }

    fn handle_event(&mut self, id: RequestId, event: &IncomingMessage<'_>) {
        dispatch!(self, c => c.handle_event(id, event))
    }

    fn event_key(&self) -> Option<SubscriptionKey> {
        dispatch!(self, c => c.event_key())
    }

    fn cancel_request(&self, ctx: &RequestContext) -> Option<HalResult<OutboundMessage>> {
        dispatch!(self, c => c.cancel_request(ctx))
    }

    fn supports_events(&self) -> bool {
        dispatch!(self, c => c.supports_events())
    }
}

impl From<GetCapabilities> for CommandKind {
    fn from(c: GetCapabilities) -> Self {
        Self::Capabilities(c)
    }
}

impl From<ResolveFamily> for CommandKind {
    fn from(c: ResolveFamily) -> Self {
        Self::ResolveFamily(c)
    }
}

impl From<ScanCommand> for CommandKind {
    fn from(c: ScanCommand) -> Self {
        Self::Scan(c)
    }
}

impl From<HotlistCommand> for CommandKind {
    fn from(c: HotlistCommand) -> Self {
        Self::Hotlist(c)
    }
}

impl From<SignificantChangeCommand> for CommandKind {
    fn from(c: SignificantChangeCommand) -> Self {
        Self::SignificantChange(c)
    }
}

/// A request id bound to a concrete command and its lifecycle state
#[derive(Debug)]
pub struct Command {
    id: RequestId,
    kind: CommandKind,
    state: CommandState,
}

impl Command {
    pub fn new(id: RequestId, kind: impl Into<CommandKind>) -> Self {
        Self {
            id,
            kind: kind.into(),
            state: CommandState::Created,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: CommandState) {
        self.state = state;
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn into_kind(self) -> CommandKind {
        self.kind
    }

    /// Build the request with this command's id stamped as its sequence number
    pub fn build_request(&self, ctx: &RequestContext) -> HalResult<OutboundMessage> {
        let mut message = self.kind.build_request(ctx)?;
        message.set_sequence(self.id.get());
        Ok(message)
    }

    pub fn handle_response(&mut self, reply: &IncomingMessage<'_>) {
        self.kind.handle_response(reply)
    }

    pub fn handle_event(&mut self, event: &IncomingMessage<'_>) {
        self.kind.handle_event(self.id, event)
    }

    pub fn event_key(&self) -> Option<SubscriptionKey> {
        self.kind.event_key()
    }

    pub fn cancel_request(&self, ctx: &RequestContext) -> Option<HalResult<OutboundMessage>> {
        self.kind.cancel_request(ctx).map(|built| {
            built.map(|mut message| {
                message.set_sequence(self.id.get());
                message
            })
        })
    }

    pub fn supports_events(&self) -> bool {
        self.kind.supports_events()
    }
}
