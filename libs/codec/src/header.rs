//! Message Header Implementation
//!
//! Every message on the control socket starts with a fixed 16-byte header;
//! data messages follow it with a 4-byte generic header naming the command.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::constants::{flags, kind};

/// Message header (16 bytes, host byte order)
///
/// ```text
/// ┌──────────────┬───────────────┬──────────────────────────┐
/// │ MessageHeader│ GenericHeader │ Attributes (4-byte align) │
/// │ (16 bytes)   │ (4 bytes)     │ (variable length)         │
/// └──────────────┴───────────────┴──────────────────────────┘
/// ```
///
/// Fields are grouped so the struct is exactly 16 bytes with no padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct MessageHeader {
    /// Total message length including this header
    pub len: u32,
    /// Family id for data messages, or one of the control kinds
    pub kind: u16,
    /// Request/ack/multipart flags
    pub flags: u16,
    /// Sequence number; carries the RequestId of the originating command
    pub seq: u32,
    /// Sending port; 0 lets the kernel fill in the socket's port
    pub port: u32,
}

impl MessageHeader {
    /// Header size in bytes
    pub const SIZE: usize = 16;

    /// Header for a request addressed to `family`
    pub fn request(family: u16) -> Self {
        Self {
            len: Self::SIZE as u32,
            kind: family,
            flags: flags::REQUEST | flags::ACK,
            seq: 0,
            port: 0,
        }
    }

    /// Whether this header describes an error or acknowledgement
    pub fn is_error(&self) -> bool {
        self.kind == kind::ERROR
    }

    /// Whether this header is one of the reserved control kinds
    pub fn is_control(&self) -> bool {
        self.kind < kind::MIN_FAMILY
    }

    /// Read a header from the front of `data`, without alignment requirements
    pub fn read(data: &[u8]) -> Option<Self> {
        Self::read_from_prefix(data)
    }
}

/// Generic header (4 bytes) naming the command of a data message
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct GenericHeader {
    pub cmd: u8,
    pub version: u8,
    pub reserved: u16,
}

impl GenericHeader {
    pub const SIZE: usize = 4;

    pub fn new(cmd: u8) -> Self {
        Self {
            cmd,
            version: 0,
            reserved: 0,
        }
    }
}

/// Round `len` up to the 4-byte boundary used by messages and attributes
#[inline]
pub const fn align(len: usize) -> usize {
    (len + 3) & !3
}
