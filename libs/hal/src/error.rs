//! HAL error kinds
//!
//! A small closed set surfaced to every caller. Codec and transport errors
//! carry richer context; they are logged where they occur and collapse into
//! one of these kinds at the API boundary.

use thiserror::Error;
use wlctl_codec::ProtocolError;
use wlctl_network::TransportError;

/// Failure kinds returned by every HAL operation
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalError {
    /// Capability absent at this layer
    #[error("operation not supported")]
    NotSupported,

    /// Correlation table is full
    #[error("correlation table is full")]
    OutOfCapacity,

    /// Malformed request rejected before send
    #[error("invalid argument")]
    InvalidArgument,

    /// Send/receive failure, including a negative acknowledgement
    #[error("transport failure")]
    TransportFailure,

    /// Operation attempted before setup or after cleanup
    #[error("not initialized")]
    Uninitialized,

    /// Unclassified failure
    #[error("unknown failure")]
    Unknown,
}

/// Result type for HAL operations
pub type HalResult<T> = std::result::Result<T, HalError>;

impl HalError {
    /// Numeric status expected by the marshaling boundary
    pub const fn status_code(self) -> i32 {
        match self {
            HalError::Unknown => -1,
            HalError::Uninitialized => -2,
            HalError::NotSupported => -3,
            HalError::InvalidArgument => -5,
            HalError::TransportFailure => -1,
            HalError::OutOfCapacity => -9,
        }
    }

    /// Static description for status reporting
    pub const fn describe(self) -> &'static str {
        match self {
            HalError::NotSupported => "not supported",
            HalError::OutOfCapacity => "out of capacity",
            HalError::InvalidArgument => "invalid arguments",
            HalError::TransportFailure => "transport failure",
            HalError::Uninitialized => "uninitialized",
            HalError::Unknown => "unknown",
        }
    }
}

/// Status code of a whole result; 0 on success
pub fn status_of<T>(result: &HalResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status_code(),
    }
}

impl From<ProtocolError> for HalError {
    fn from(_: ProtocolError) -> Self {
        HalError::InvalidArgument
    }
}

impl From<TransportError> for HalError {
    fn from(_: TransportError) -> Self {
        HalError::TransportFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_of::<()>(&Ok(())), 0);
        assert_eq!(HalError::Uninitialized.status_code(), -2);
        assert_eq!(HalError::NotSupported.status_code(), -3);
        assert_eq!(HalError::InvalidArgument.status_code(), -5);
        assert_eq!(HalError::OutOfCapacity.status_code(), -9);
    }

    #[test]
    fn test_conversions() {
        let protocol = ProtocolError::unbalanced("test");
        assert_eq!(HalError::from(protocol), HalError::InvalidArgument);

        let transport = TransportError::closed("test");
        assert_eq!(HalError::from(transport), HalError::TransportFailure);
    }
}
