//! Codec error types.

use thiserror::Error;

/// Errors raised while parsing a message from raw bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the fixed header
    #[error("message too short: {0} bytes")]
    TooShort(usize),

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Token length nibble above 8
    #[error("invalid token length: {0}")]
    TokenLength(u8),

    /// Token, option or payload runs past the end of the datagram
    #[error("truncated message")]
    Truncated,

    /// Delta or length nibble set to the reserved value 15
    #[error("reserved option nibble")]
    ReservedNibble,

    /// Option number overflowed 16 bits
    #[error("option number overflow")]
    OptionNumber,

    /// Payload marker present but no payload follows
    #[error("payload marker without payload")]
    EmptyPayload,

    /// Option value does not fit the declared option format
    #[error("invalid value for option {0}")]
    OptionValue(u16),
}

/// Errors raised while serializing a message into a caller buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Encoded form does not fit the caller's buffer; nothing was written
    #[error("encode overflow: need {needed} bytes, buffer holds {capacity}")]
    Overflow {
        /// Bytes required for the full message
        needed: usize,
        /// Bytes available in the buffer
        capacity: usize,
    },

    /// Token longer than 8 bytes
    #[error("invalid token length: {0}")]
    TokenLength(usize),

    /// Option value longer than the extended length form can express
    #[error("option {number} value too long: {len} bytes")]
    OptionTooLong {
        /// Option number
        number: u16,
        /// Offending value length
        len: usize,
    },
}
