//! # Wireless Control HAL
//!
//! Command/event correlation over one kernel wireless control socket.
//!
//! Callers build a [`Command`], then either [`WifiHal::submit`] it and block
//! for its reply, or [`WifiHal::subscribe`] it and receive events until they
//! cancel. A single receive loop thread reads the socket and routes every
//! inbound message through the bounded [`CorrelationRegistry`]:
//!
//! - replies and acknowledgements by sequence number to the live command
//! - notifications by [`SubscriptionKey`] to the registered subscription
//!
//! Handlers run on the loop thread and must not block. They also must not
//! cancel their own subscription, since cancellation waits for the handler
//! to return.

pub mod command;
pub mod commands;
pub mod error;
pub mod event_loop;
pub mod hal;
pub mod registry;

pub use command::{
    Command, CommandHandler, CommandKind, CommandState, RequestContext, RequestId, ResultHandler,
    SubscriptionKey, INTERNAL_ID_BASE,
};
pub use commands::{
    BucketSpec, GetCapabilities, HotlistCommand, ResolveFamily, ScanCapabilities, ScanCommand,
    ScanParams, ScanResult, SignificantChangeCommand,
};
pub use error::{status_of, HalError, HalResult};
pub use hal::{SubscriptionHandle, WifiHal};
pub use registry::CorrelationRegistry;
