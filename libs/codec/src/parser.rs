//! # Message Parser - Inbound Control Message Decoding
//!
//! ## Purpose
//!
//! Zero-copy view over one raw inbound message. `parse()` reads the
//! headers, classifies the message, and indexes the top-level attributes
//! by tag; accessors are read-only views into the caller's buffer, so the
//! buffer must outlive the parser.
//!
//! ## Architecture Role
//!
//! ```text
//! Socket read → [frames()] → IncomingMessage::parse() → Receive Loop
//!                   ↓                   ↓                     ↓
//!             Split packed        Header + tag index     Classify and
//!             messages by len     (first parse only)     dispatch
//! ```
//!
//! Nested groups are never indexed eagerly: `iterate(tag)` walks them
//! lazily in the order they were received.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::builder::ATTR_HEADER_SIZE;
use crate::constants::{attr_flags, kind, nl80211, MacAddr, ADDR_LEN};
use crate::error::{ProtocolError, ProtocolResult};
use crate::header::{align, GenericHeader, MessageHeader};

/// Classification of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Family data message: a reply or a notification
    Data,
    /// Positive acknowledgement (error message with errno 0)
    Ack,
    /// Negative acknowledgement carrying the kernel errno
    Error(i32),
    /// End of a multipart reply
    Done,
    Noop,
    Overrun,
}

/// A single attribute borrowed from a message buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
    tag: u16,
    nested: bool,
    payload: &'a [u8],
}

impl<'a> Attribute<'a> {
    /// Tag with the nested/byte-order flag bits masked off
    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// Whether the sender marked this attribute as a nested group
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Payload length, excluding header and padding
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self.payload {
            [value] => Some(*value),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        self.payload.try_into().ok().map(u16::from_ne_bytes)
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.payload.try_into().ok().map(u32::from_ne_bytes)
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.payload.try_into().ok().map(u64::from_ne_bytes)
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.payload.try_into().ok().map(i32::from_ne_bytes)
    }

    /// String payload up to the first NUL; `None` if not valid UTF-8
    pub fn as_str(&self) -> Option<&'a str> {
        let end = self
            .payload
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.payload.len());
        std::str::from_utf8(&self.payload[..end]).ok()
    }

    /// Hardware address; payload must be exactly 6 bytes
    pub fn as_addr(&self) -> Option<MacAddr> {
        if self.payload.len() != ADDR_LEN {
            return None;
        }
        let mut addr = [0u8; ADDR_LEN];
        addr.copy_from_slice(self.payload);
        Some(addr)
    }

    /// Iterate the children of this attribute as a nested group
    pub fn nested(&self) -> AttributeIter<'a> {
        AttributeIter::new(self.payload)
    }
}

/// Forward iterator over a run of attributes
///
/// Stops at the end of the region or at the first malformed attribute.
#[derive(Debug)]
pub struct AttributeIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AttributeIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn next_attribute(&mut self) -> ProtocolResult<Option<Attribute<'a>>> {
        let remaining = self.data.len().saturating_sub(self.offset);
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < ATTR_HEADER_SIZE {
            return Err(ProtocolError::truncated_attribute(
                0,
                self.offset,
                ATTR_HEADER_SIZE,
                remaining,
            ));
        }

        let at = self.offset;
        let len = u16::from_ne_bytes([self.data[at], self.data[at + 1]]) as usize;
        let raw_tag = u16::from_ne_bytes([self.data[at + 2], self.data[at + 3]]);
        let tag = raw_tag & attr_flags::TAG_MASK;

        if len < ATTR_HEADER_SIZE || len > remaining {
            return Err(ProtocolError::truncated_attribute(tag, at, len, remaining));
        }

        self.offset = (at + align(len)).min(self.data.len());
        Ok(Some(Attribute {
            tag,
            nested: raw_tag & attr_flags::NESTED != 0,
            payload: &self.data[at + ATTR_HEADER_SIZE..at + len],
        }))
    }
}

impl<'a> Iterator for AttributeIter<'a> {
    type Item = Attribute<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_attribute() {
            Ok(attribute) => attribute,
            Err(e) => {
                debug!("Stopping attribute iteration: {}", e);
                self.offset = self.data.len();
                None
            }
        }
    }
}

/// Parsed header state and attribute index
#[derive(Debug)]
struct Parsed<'a> {
    header: MessageHeader,
    kind: MessageKind,
    cmd: Option<u8>,
    vendor: Option<(u32, u32)>,
    attributes: Vec<Attribute<'a>>,
    index: HashMap<u16, usize>,
}

/// View over one raw inbound message
#[derive(Debug)]
pub struct IncomingMessage<'a> {
    raw: &'a [u8],
    parsed: Option<Parsed<'a>>,
}

impl<'a> IncomingMessage<'a> {
    pub fn new(raw: &'a [u8]) -> Self {
        Self { raw, parsed: None }
    }

    /// Create and parse in one step
    pub fn parse_from(raw: &'a [u8]) -> ProtocolResult<Self> {
        let mut message = Self::new(raw);
        message.parse()?;
        Ok(message)
    }

    /// Read the headers and index top-level attributes
    ///
    /// A second call on an already parsed message does nothing.
    pub fn parse(&mut self) -> ProtocolResult<()> {
        if self.parsed.is_some() {
            return Ok(());
        }

        let header = MessageHeader::read(self.raw).ok_or_else(|| {
            ProtocolError::message_too_small(MessageHeader::SIZE, self.raw.len(), "message header")
        })?;
        let len = header.len as usize;
        if len < MessageHeader::SIZE || len > self.raw.len() {
            return Err(ProtocolError::InvalidLength {
                declared: len,
                buffer_size: self.raw.len(),
            });
        }
        let body = &self.raw[MessageHeader::SIZE..len];

        let parsed = match header.kind {
            kind::ERROR => {
                let errno = body
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .map(i32::from_ne_bytes)
                    .ok_or_else(|| ProtocolError::message_too_small(4, body.len(), "error code"))?;
                let kind = if errno == 0 {
                    MessageKind::Ack
                } else {
                    MessageKind::Error(errno)
                };
                Parsed::control(header, kind)
            }
            kind::DONE => Parsed::control(header, MessageKind::Done),
            kind::NOOP => Parsed::control(header, MessageKind::Noop),
            kind::OVERRUN => Parsed::control(header, MessageKind::Overrun),
            other if other < kind::MIN_FAMILY => {
                return Err(ProtocolError::UnexpectedKind {
                    kind: other,
                    context: "reserved control kind".to_string(),
                });
            }
            _ => Self::parse_data(header, body)?,
        };

        self.parsed = Some(parsed);
        Ok(())
    }

    fn parse_data(header: MessageHeader, body: &'a [u8]) -> ProtocolResult<Parsed<'a>> {
        if body.len() < GenericHeader::SIZE {
            return Err(ProtocolError::message_too_small(
                MessageHeader::SIZE + GenericHeader::SIZE,
                MessageHeader::SIZE + body.len(),
                "generic header",
            ));
        }
        let cmd = body[0];

        let mut attributes = Vec::new();
        let mut index = HashMap::new();
        let mut iter = AttributeIter::new(&body[GenericHeader::SIZE..]);
        while let Some(attribute) = iter.next_attribute()? {
            index.insert(attribute.tag, attributes.len());
            attributes.push(attribute);
        }

        let lookup_u32 = |tag: u16| {
            index
                .get(&tag)
                .and_then(|i: &usize| attributes[*i].as_u32())
        };
        let vendor = if cmd == nl80211::CMD_VENDOR {
            lookup_u32(nl80211::ATTR_VENDOR_ID).zip(lookup_u32(nl80211::ATTR_VENDOR_SUBCMD))
        } else {
            None
        };

        Ok(Parsed {
            header,
            kind: MessageKind::Data,
            cmd: Some(cmd),
            vendor,
            attributes,
            index,
        })
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed.is_some()
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn header(&self) -> ProtocolResult<&MessageHeader> {
        self.parsed
            .as_ref()
            .map(|p| &p.header)
            .ok_or(ProtocolError::NotParsed)
    }

    pub fn kind(&self) -> ProtocolResult<MessageKind> {
        self.parsed
            .as_ref()
            .map(|p| p.kind)
            .ok_or(ProtocolError::NotParsed)
    }

    pub fn sequence(&self) -> Option<u32> {
        self.parsed.as_ref().map(|p| p.header.seq)
    }

    pub fn port(&self) -> Option<u32> {
        self.parsed.as_ref().map(|p| p.header.port)
    }

    /// Command code of a data message
    pub fn command(&self) -> Option<u8> {
        self.parsed.as_ref().and_then(|p| p.cmd)
    }

    /// Vendor id, present only on vendor operations
    pub fn vendor_id(&self) -> Option<u32> {
        self.parsed.as_ref().and_then(|p| p.vendor).map(|v| v.0)
    }

    /// Vendor sub-command, present only on vendor operations
    pub fn vendor_subcommand(&self) -> Option<u32> {
        self.parsed.as_ref().and_then(|p| p.vendor).map(|v| v.1)
    }

    pub fn is_vendor(&self) -> bool {
        self.vendor_id().is_some()
    }

    pub fn attribute(&self, tag: u16) -> Option<&Attribute<'a>> {
        let parsed = self.parsed.as_ref()?;
        parsed.index.get(&tag).map(|i| &parsed.attributes[*i])
    }

    /// All top-level attributes in received order
    pub fn attributes(&self) -> &[Attribute<'a>] {
        self.parsed
            .as_ref()
            .map(|p| p.attributes.as_slice())
            .unwrap_or(&[])
    }

    pub fn get_u8(&self, tag: u16) -> Option<u8> {
        self.attribute(tag).and_then(Attribute::as_u8)
    }

    pub fn get_u16(&self, tag: u16) -> Option<u16> {
        self.attribute(tag).and_then(Attribute::as_u16)
    }

    pub fn get_u32(&self, tag: u16) -> Option<u32> {
        self.attribute(tag).and_then(Attribute::as_u32)
    }

    pub fn get_u64(&self, tag: u16) -> Option<u64> {
        self.attribute(tag).and_then(Attribute::as_u64)
    }

    pub fn get_i32(&self, tag: u16) -> Option<i32> {
        self.attribute(tag).and_then(Attribute::as_i32)
    }

    pub fn get_str(&self, tag: u16) -> Option<&'a str> {
        self.attribute(tag).and_then(Attribute::as_str)
    }

    pub fn get_bytes(&self, tag: u16) -> Option<&'a [u8]> {
        self.attribute(tag).map(Attribute::payload)
    }

    /// Payload length of an attribute
    pub fn attribute_len(&self, tag: u16) -> Option<usize> {
        self.attribute(tag).map(Attribute::len)
    }

    /// Iterate the children of a nested top-level attribute
    pub fn iterate(&self, tag: u16) -> Option<AttributeIter<'a>> {
        self.attribute(tag).map(Attribute::nested)
    }

    /// Vendor payload of a vendor operation
    pub fn vendor_data(&self) -> Option<&Attribute<'a>> {
        if !self.is_vendor() {
            return None;
        }
        self.attribute(nl80211::ATTR_VENDOR_DATA)
    }

    /// Dump the raw bytes at trace level
    pub fn log(&self) {
        trace!(
            len = self.raw.len(),
            seq = self.sequence(),
            cmd = self.command(),
            "inbound message {}",
            hex::encode(self.raw)
        );
    }
}

impl<'a> Parsed<'a> {
    fn control(header: MessageHeader, kind: MessageKind) -> Self {
        Self {
            header,
            kind,
            cmd: None,
            vendor: None,
            attributes: Vec::new(),
            index: HashMap::new(),
        }
    }
}

/// Iterator over the messages packed into one socket read
#[derive(Debug)]
pub struct Frames<'a> {
    buf: &'a [u8],
    offset: usize,
}

/// Split a receive buffer into individual messages by their length field
pub fn frames(buf: &[u8]) -> Frames<'_> {
    Frames { buf, offset: 0 }
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.buf.get(self.offset..)?;
        let header = MessageHeader::read(rest)?;
        let len = header.len as usize;
        if len < MessageHeader::SIZE || len > rest.len() {
            debug!(
                declared = len,
                available = rest.len(),
                "Discarding truncated frame"
            );
            self.offset = self.buf.len();
            return None;
        }
        self.offset += align(len);
        Some(&rest[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{encode_ack, encode_done, MessageBuilder};

    const FAMILY: u16 = 0x1c;

    #[test]
    fn test_accessors_before_parse() {
        let bytes = MessageBuilder::new(FAMILY, 5)
            .expect("builder")
            .build()
            .expect("build")
            .into_bytes();
        let mut message = IncomingMessage::new(&bytes);

        assert_eq!(message.kind(), Err(ProtocolError::NotParsed));
        assert_eq!(message.command(), None);
        assert!(message.attributes().is_empty());

        message.parse().expect("parse");
        assert_eq!(message.kind(), Ok(MessageKind::Data));
        assert_eq!(message.command(), Some(5));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let mut builder = MessageBuilder::new(FAMILY, 1).expect("builder");
        builder.put_u32(7, 99).expect("put");
        let bytes = builder.build().expect("build").into_bytes();

        let mut message = IncomingMessage::new(&bytes);
        message.parse().expect("first parse");
        message.parse().expect("second parse");
        assert_eq!(message.attributes().len(), 1);
        assert_eq!(message.get_u32(7), Some(99));
    }

    #[test]
    fn test_ack_and_error_classification() {
        let ack = encode_ack(4, 0, 0);
        let nack = encode_ack(5, -22, 0);
        let done = encode_done(6, 0);

        let ack = IncomingMessage::parse_from(&ack).expect("ack");
        assert_eq!(ack.kind(), Ok(MessageKind::Ack));
        assert_eq!(ack.sequence(), Some(4));

        let nack = IncomingMessage::parse_from(&nack).expect("nack");
        assert_eq!(nack.kind(), Ok(MessageKind::Error(-22)));

        let done = IncomingMessage::parse_from(&done).expect("done");
        assert_eq!(done.kind(), Ok(MessageKind::Done));
        assert_eq!(done.command(), None);
    }

    #[test]
    fn test_wrong_width_yields_none() {
        let mut builder = MessageBuilder::new(FAMILY, 1).expect("builder");
        builder.put_u16(3, 7).expect("put");
        let bytes = builder.build().expect("build").into_bytes();
        let message = IncomingMessage::parse_from(&bytes).expect("parse");

        assert_eq!(message.get_u16(3), Some(7));
        assert_eq!(message.get_u32(3), None);
        assert_eq!(message.get_u32(4), None);
    }

    #[test]
    fn test_string_stops_at_nul() {
        let attr = Attribute {
            tag: 1,
            nested: false,
            payload: b"home\0junk",
        };
        assert_eq!(attr.as_str(), Some("home"));
    }

    #[test]
    fn test_declared_length_beyond_buffer() {
        let mut bytes = MessageBuilder::new(FAMILY, 1)
            .expect("builder")
            .build()
            .expect("build")
            .into_bytes();
        bytes[0..4].copy_from_slice(&100u32.to_ne_bytes());

        let err = IncomingMessage::parse_from(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLength { declared: 100, .. }));
    }

    #[test]
    fn test_truncated_attribute_rejected() {
        let mut builder = MessageBuilder::new(FAMILY, 1).expect("builder");
        builder.put_u32(2, 1).expect("put");
        let mut bytes = builder.build().expect("build").into_bytes();
        // Attribute claims 40 bytes inside a 28 byte message
        bytes[20..22].copy_from_slice(&40u16.to_ne_bytes());

        let err = IncomingMessage::parse_from(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedAttribute { tag: 2, .. }));
    }

    #[test]
    fn test_frames_split_packed_reads() {
        let mut buf = encode_ack(1, 0, 0);
        buf.extend_from_slice(&encode_done(2, 0));
        buf.extend_from_slice(&[0u8; 3]);

        let seqs: Vec<u32> = frames(&buf)
            .filter_map(|f| IncomingMessage::parse_from(f).ok())
            .filter_map(|m| m.sequence())
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }
}
