//! # Wireless Control Codec
//!
//! ## Purpose
//!
//! The wire layer of the wireless control stack: message construction,
//! message parsing and attribute extraction, and the numbering shared
//! with the kernel-resident control interface.
//!
//! ## Architecture Role
//!
//! ```text
//! wlctl-hal commands → [codec] → wlctl-network
//!        ↑                ↓             ↓
//!   Typed fields    Builder/Parser   Socket I/O
//! ```
//!
//! ## What This Crate Contains
//! - `MessageBuilder` for constructing plain and vendor-scoped messages
//! - `IncomingMessage` for parsing, with a tag index and nested iteration
//! - Protocol constants and the vendor attribute tag ranges
//! - `ProtocolError` describing every build and parse failure
//!
//! ## What This Crate Does NOT Contain
//! - Socket handling (belongs in wlctl-network)
//! - Request/reply correlation (belongs in wlctl-hal)

pub mod builder;
pub mod constants;
pub mod error;
pub mod header;
pub mod parser;

pub use builder::{encode_ack, encode_done, MessageBuilder, OutboundMessage, ATTR_HEADER_SIZE};
pub use constants::{MacAddr, ADDR_LEN};
pub use error::{ProtocolError, ProtocolResult};
pub use header::{align, GenericHeader, MessageHeader};
pub use parser::{frames, Attribute, AttributeIter, Frames, IncomingMessage, MessageKind};
