//! # Message Builder - Outbound Control Message Construction
//!
//! ## Purpose
//!
//! Builds a single control message: header, command code, and a flat or
//! nested set of typed attributes. Vendor operations are wrapped in the
//! generic vendor envelope, with the vendor id and sub-command emitted as
//! the first two attributes.
//!
//! ## Architecture
//!
//! ```text
//! Commands → [MessageBuilder] → OutboundMessage → Send lock → Socket
//!     ↑             ↓                  ↓
//! Typed        Attribute          Sequence stamped
//! fields       encoding           at send time
//! ```
//!
//! Nested groups follow stack discipline: every `begin_nested` must be
//! closed by `end_nested` before `build`. Any failing step aborts the
//! message; callers discard the builder and never send a partial message.

use zerocopy::AsBytes;

use crate::constants::{attr_flags, flags, kind, nl80211, MacAddr};
use crate::error::{ProtocolError, ProtocolResult};
use crate::header::{align, GenericHeader, MessageHeader};

/// Attribute header size (length + tag)
pub const ATTR_HEADER_SIZE: usize = 4;

/// Largest payload an attribute length field can describe
pub const MAX_ATTR_PAYLOAD: usize = u16::MAX as usize - ATTR_HEADER_SIZE;

/// Open nested group: offset of its attribute header and its tag
#[derive(Debug, Clone, Copy)]
struct NestFrame {
    offset: usize,
    tag: u16,
}

/// Builder for one outbound control message
#[derive(Debug)]
pub struct MessageBuilder {
    buf: Vec<u8>,
    nests: Vec<NestFrame>,
    max_size: usize,
    cmd: u8,
}

impl MessageBuilder {
    /// Default upper bound on a built message
    pub const DEFAULT_MAX_SIZE: usize = 16 * 1024;

    /// Start a message carrying `cmd` for `family`
    pub fn new(family: u16, cmd: u8) -> ProtocolResult<Self> {
        Self::with_max_size(family, cmd, Self::DEFAULT_MAX_SIZE)
    }

    /// Start a message with an explicit size limit
    pub fn with_max_size(family: u16, cmd: u8, max_size: usize) -> ProtocolResult<Self> {
        let mut builder = Self {
            buf: Vec::new(),
            nests: Vec::new(),
            max_size,
            cmd,
        };
        builder.reserve(MessageHeader::SIZE + GenericHeader::SIZE)?;
        builder
            .buf
            .extend_from_slice(MessageHeader::request(family).as_bytes());
        builder
            .buf
            .extend_from_slice(GenericHeader::new(cmd).as_bytes());
        Ok(builder)
    }

    /// Start a vendor operation wrapped in the generic vendor envelope
    pub fn vendor(family: u16, vendor_id: u32, subcmd: u32) -> ProtocolResult<Self> {
        let mut builder = Self::new(family, nl80211::CMD_VENDOR)?;
        builder
            .put_u32(nl80211::ATTR_VENDOR_ID, vendor_id)?
            .put_u32(nl80211::ATTR_VENDOR_SUBCMD, subcmd)?;
        Ok(builder)
    }

    /// Vendor operation with an explicit size limit
    pub fn vendor_with_max_size(
        family: u16,
        vendor_id: u32,
        subcmd: u32,
        max_size: usize,
    ) -> ProtocolResult<Self> {
        let mut builder = Self::with_max_size(family, nl80211::CMD_VENDOR, max_size)?;
        builder
            .put_u32(nl80211::ATTR_VENDOR_ID, vendor_id)?
            .put_u32(nl80211::ATTR_VENDOR_SUBCMD, subcmd)?;
        Ok(builder)
    }

    fn reserve(&mut self, additional: usize) -> ProtocolResult<()> {
        let size = self.buf.len() + additional;
        if size > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_size,
            });
        }
        self.buf
            .try_reserve(additional)
            .map_err(|_| ProtocolError::Allocation {
                requested: additional,
            })
    }

    fn put_header(&mut self, len: u16, tag: u16) {
        self.buf.extend_from_slice(&len.to_ne_bytes());
        self.buf.extend_from_slice(&tag.to_ne_bytes());
    }

    /// Add an attribute with a raw payload
    pub fn put_bytes(&mut self, tag: u16, payload: &[u8]) -> ProtocolResult<&mut Self> {
        if payload.len() > MAX_ATTR_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                tag,
                size: payload.len(),
                limit: MAX_ATTR_PAYLOAD,
            });
        }
        let len = ATTR_HEADER_SIZE + payload.len();
        let padded = align(len);
        self.reserve(padded)?;

        self.put_header(len as u16, tag & attr_flags::TAG_MASK);
        self.buf.extend_from_slice(payload);
        self.buf.resize(self.buf.len() + (padded - len), 0);
        Ok(self)
    }

    pub fn put_u8(&mut self, tag: u16, value: u8) -> ProtocolResult<&mut Self> {
        self.put_bytes(tag, &[value])
    }

    pub fn put_u16(&mut self, tag: u16, value: u16) -> ProtocolResult<&mut Self> {
        self.put_bytes(tag, &value.to_ne_bytes())
    }

    pub fn put_u32(&mut self, tag: u16, value: u32) -> ProtocolResult<&mut Self> {
        self.put_bytes(tag, &value.to_ne_bytes())
    }

    pub fn put_u64(&mut self, tag: u16, value: u64) -> ProtocolResult<&mut Self> {
        self.put_bytes(tag, &value.to_ne_bytes())
    }

    pub fn put_i32(&mut self, tag: u16, value: i32) -> ProtocolResult<&mut Self> {
        self.put_bytes(tag, &value.to_ne_bytes())
    }

    /// Add a NUL-terminated string
    pub fn put_string(&mut self, tag: u16, value: &str) -> ProtocolResult<&mut Self> {
        let mut payload = Vec::new();
        payload
            .try_reserve(value.len() + 1)
            .map_err(|_| ProtocolError::Allocation {
                requested: value.len() + 1,
            })?;
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.put_bytes(tag, &payload)
    }

    /// Add a 6-byte hardware address
    pub fn put_addr(&mut self, tag: u16, addr: &MacAddr) -> ProtocolResult<&mut Self> {
        self.put_bytes(tag, addr)
    }

    /// Add a zero-length flag attribute
    pub fn put_flag(&mut self, tag: u16) -> ProtocolResult<&mut Self> {
        self.put_bytes(tag, &[])
    }

    /// Open a nested group; children are added until the matching `end_nested`
    pub fn begin_nested(&mut self, tag: u16) -> ProtocolResult<&mut Self> {
        self.reserve(ATTR_HEADER_SIZE)?;
        let offset = self.buf.len();
        self.put_header(0, (tag & attr_flags::TAG_MASK) | attr_flags::NESTED);
        self.nests.push(NestFrame { offset, tag });
        Ok(self)
    }

    /// Close the most recently opened nested group
    pub fn end_nested(&mut self) -> ProtocolResult<&mut Self> {
        let frame = self
            .nests
            .pop()
            .ok_or_else(|| ProtocolError::unbalanced("end_nested without open group"))?;

        let len = self.buf.len() - frame.offset;
        if len > u16::MAX as usize {
            return Err(ProtocolError::PayloadTooLarge {
                tag: frame.tag,
                size: len - ATTR_HEADER_SIZE,
                limit: MAX_ATTR_PAYLOAD,
            });
        }
        self.buf[frame.offset..frame.offset + 2].copy_from_slice(&(len as u16).to_ne_bytes());
        Ok(self)
    }

    /// Build a nested group from a closure, closing it even when empty
    pub fn nested<F>(&mut self, tag: u16, fill: F) -> ProtocolResult<&mut Self>
    where
        F: FnOnce(&mut Self) -> ProtocolResult<()>,
    {
        let depth = self.nests.len();
        self.begin_nested(tag)?;
        fill(self)?;
        if self.nests.len() != depth + 1 {
            return Err(ProtocolError::unbalanced(format!(
                "group {} closed with {} groups still open",
                tag,
                self.nests.len().saturating_sub(depth + 1)
            )));
        }
        self.end_nested()
    }

    /// Number of currently open nested groups
    pub fn depth(&self) -> usize {
        self.nests.len()
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() == MessageHeader::SIZE + GenericHeader::SIZE
    }

    /// Command code this builder was created with
    pub fn command(&self) -> u8 {
        self.cmd
    }

    /// Finalize the header length and return the message
    pub fn build(mut self) -> ProtocolResult<OutboundMessage> {
        if let Some(open) = self.nests.last() {
            return Err(ProtocolError::unbalanced(format!(
                "{} nested groups still open (innermost tag {})",
                self.nests.len(),
                open.tag
            )));
        }
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        Ok(OutboundMessage { bytes: self.buf })
    }
}

/// A fully built message; sequence and flags may still be stamped before sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    bytes: Vec<u8>,
}

impl OutboundMessage {
    fn header(&self) -> MessageHeader {
        // Built messages always start with a complete header
        MessageHeader::read(&self.bytes).unwrap_or_else(|| MessageHeader::request(0))
    }

    fn write_header(&mut self, header: MessageHeader) {
        self.bytes[..MessageHeader::SIZE].copy_from_slice(header.as_bytes());
    }

    pub fn sequence(&self) -> u32 {
        self.header().seq
    }

    pub fn set_sequence(&mut self, seq: u32) {
        let mut header = self.header();
        header.seq = seq;
        self.write_header(header);
    }

    pub fn flags(&self) -> u16 {
        self.header().flags
    }

    pub fn set_flags(&mut self, flags: u16) {
        let mut header = self.header();
        header.flags = flags;
        self.write_header(header);
    }

    pub fn set_port(&mut self, port: u32) {
        let mut header = self.header();
        header.port = port;
        self.write_header(header);
    }

    pub fn family(&self) -> u16 {
        self.header().kind
    }

    pub fn command(&self) -> u8 {
        self.bytes[MessageHeader::SIZE]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Encode an acknowledgement (`errno == 0`) or negative acknowledgement
///
/// The payload is the errno followed by a copy of the request header, as
/// the kernel does when it answers a request carrying the ACK flag.
pub fn encode_ack(seq: u32, errno: i32, port: u32) -> Vec<u8> {
    let len = MessageHeader::SIZE + 4 + MessageHeader::SIZE;
    let header = MessageHeader {
        len: len as u32,
        kind: kind::ERROR,
        flags: 0,
        seq,
        port,
    };
    let original = MessageHeader {
        len: MessageHeader::SIZE as u32,
        kind: kind::MIN_FAMILY,
        flags: flags::REQUEST | flags::ACK,
        seq,
        port,
    };

    let mut bytes = Vec::with_capacity(len);
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(&errno.to_ne_bytes());
    bytes.extend_from_slice(original.as_bytes());
    bytes
}

/// Encode the terminator of a multipart reply
pub fn encode_done(seq: u32, port: u32) -> Vec<u8> {
    let len = MessageHeader::SIZE + 4;
    let header = MessageHeader {
        len: len as u32,
        kind: kind::DONE,
        flags: flags::MULTI,
        seq,
        port,
    };
    let mut bytes = Vec::with_capacity(len);
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(&0i32.to_ne_bytes());
    bytes
}
