//! Fixed header fields: message type, code and content formats.
//!
//! The 4-byte header carries everything needed to correlate a response with
//! its request without touching options or payload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version (must be 1)
pub const WIRE_VERSION: u8 = 1;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 4;

/// Longest token the header can announce
pub const MAX_TOKEN_LEN: usize = 8;

/// Byte separating options from the payload
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Message types as defined in the header's T field
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Confirmable, expects an ACK
    Confirmable = 0,
    /// Non-confirmable, fire-and-forget
    NonConfirmable = 1,
    /// Acknowledgement, may piggyback a response
    Acknowledgement = 2,
    /// Reset, rejects a message
    Reset = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = crate::DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Confirmable),
            1 => Ok(MessageType::NonConfirmable),
            2 => Ok(MessageType::Acknowledgement),
            3 => Ok(MessageType::Reset),
            // Two-bit field, unreachable from the decoder
            _ => Err(crate::DecodeError::Truncated),
        }
    }
}

/// Request method or response status, packed as `class.detail`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Code(pub u8);

impl Code {
    /// 0.00 Empty
    pub const EMPTY: Code = Code::new(0, 0);
    /// 0.01 GET
    pub const GET: Code = Code::new(0, 1);
    /// 0.02 POST
    pub const POST: Code = Code::new(0, 2);
    /// 0.03 PUT
    pub const PUT: Code = Code::new(0, 3);
    /// 0.04 DELETE
    pub const DELETE: Code = Code::new(0, 4);
    /// 2.01 Created
    pub const CREATED: Code = Code::new(2, 1);
    /// 2.02 Deleted
    pub const DELETED: Code = Code::new(2, 2);
    /// 2.04 Changed
    pub const CHANGED: Code = Code::new(2, 4);
    /// 2.05 Content
    pub const CONTENT: Code = Code::new(2, 5);
    /// 4.00 Bad Request
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    /// 4.04 Not Found
    pub const NOT_FOUND: Code = Code::new(4, 4);
    /// 4.05 Method Not Allowed
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    /// 5.00 Internal Server Error
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);

    /// Build a code from its class (0..7) and detail (0..31)
    pub const fn new(class: u8, detail: u8) -> Self {
        Code(((class & 0x07) << 5) | (detail & 0x1F))
    }

    /// Code class (0 request, 2 success, 4 client error, 5 server error)
    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    /// Code detail
    pub const fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    /// Whether this is the empty code
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether this code names a request method
    pub const fn is_request(self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    /// Whether this code is a response status
    pub const fn is_response(self) -> bool {
        self.class() >= 2
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({})", self)
    }
}

/// Request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Retrieve a representation
    Get,
    /// Process the enclosed representation
    Post,
    /// Replace the target resource
    Put,
    /// Remove the target resource
    Delete,
}

impl Method {
    /// Request code for this method
    pub const fn code(self) -> Code {
        match self {
            Method::Get => Code::GET,
            Method::Post => Code::POST,
            Method::Put => Code::PUT,
            Method::Delete => Code::DELETE,
        }
    }

    /// Method named by a request code
    pub fn from_code(code: Code) -> Option<Self> {
        match code {
            Code::GET => Some(Method::Get),
            Code::POST => Some(Method::Post),
            Code::PUT => Some(Method::Put),
            Code::DELETE => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Content-Format option value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentFormat(pub u16);

impl ContentFormat {
    /// text/plain; charset=utf-8
    pub const TEXT_PLAIN: ContentFormat = ContentFormat(0);
    /// application/link-format
    pub const LINK_FORMAT: ContentFormat = ContentFormat(40);
    /// application/octet-stream
    pub const OCTET_STREAM: ContentFormat = ContentFormat(42);
    /// application/json
    pub const JSON: ContentFormat = ContentFormat(50);
    /// application/cbor
    pub const CBOR: ContentFormat = ContentFormat(60);
}
