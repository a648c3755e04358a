//! Protocol-level errors for message construction and parsing
//!
//! Each variant carries enough context to diagnose a malformed message
//! from a log line alone: offsets, declared versus available sizes, and
//! the attribute tag involved.

use thiserror::Error;

/// Message construction and parsing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is too small to contain the expected structure
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// Header length field disagrees with the buffer
    #[error("Invalid message length {declared} for buffer of {buffer_size} bytes")]
    InvalidLength { declared: usize, buffer_size: usize },

    /// Attribute declares more bytes than remain in its enclosing region
    #[error("Truncated attribute: need {required_bytes} bytes, region has {available} (tag {tag} at offset {offset})")]
    TruncatedAttribute {
        tag: u16,
        offset: usize,
        required_bytes: usize,
        available: usize,
    },

    /// Attribute payload does not fit the 16-bit length field
    #[error("Attribute payload too large: {size} bytes exceeds limit {limit} (tag {tag})")]
    PayloadTooLarge { tag: u16, size: usize, limit: usize },

    /// Complete message would exceed the configured limit
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// List holds more entries than 16-bit attribute tags can index
    #[error("Too many list entries: {count} exceeds {max}")]
    TooManyEntries { count: usize, max: usize },

    /// Nested group operations out of order
    #[error("Unbalanced nesting: {0}")]
    UnbalancedNesting(String),

    /// Buffer growth failed
    #[error("Allocation of {requested} bytes failed")]
    Allocation { requested: usize },

    /// Accessor used before `parse()`
    #[error("Message accessed before parse")]
    NotParsed,

    /// Message kind is not a data message where one was required
    #[error("Unexpected message kind {kind:#06x} ({context})")]
    UnexpectedKind { kind: u16, context: String },
}

impl ProtocolError {
    pub fn message_too_small(need: usize, got: usize, context: impl Into<String>) -> Self {
        Self::MessageTooSmall {
            need,
            got,
            context: context.into(),
        }
    }

    pub fn truncated_attribute(tag: u16, offset: usize, required_bytes: usize, available: usize) -> Self {
        Self::TruncatedAttribute {
            tag,
            offset,
            required_bytes,
            available,
        }
    }

    pub fn unbalanced(description: impl Into<String>) -> Self {
        Self::UnbalancedNesting(description.into())
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
