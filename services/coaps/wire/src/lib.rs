//! Compact request/response message model and codec for coaps.
//!
//! This crate implements the message framing carried inside every secure
//! session: a fixed 4-byte header, an optional token, delta-encoded options
//! and an optional payload introduced by a marker byte.
//!
//! ## Wire Format
//!
//! ```text
//! +----+----+------+---------+------------------+
//! |Ver | T  | TKL  |  Code   |    Message ID    |
//! | 2b | 2b |  4b  |   8b    |       16b        |
//! +----+----+------+---------+------------------+
//! | Token (0..8 bytes)                          |
//! +---------------------------------------------+
//! | Options (delta/length nibbles, ascending)   |
//! +---------------------------------------------+
//! | 0xFF | Payload (1..N bytes)                 |
//! +---------------------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust
//! use coaps_wire::{decode, encode, Code, Message, MessageType};
//!
//! let request = Message::request(MessageType::Confirmable, Code::GET, 0x1234)
//!     .with_path("time");
//!
//! let mut buf = [0u8; 64];
//! let len = encode(&request, &mut buf).unwrap();
//! let decoded = decode(&buf[..len]).unwrap();
//! assert_eq!(decoded, request);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod header;
pub mod message;

// Re-export main types
pub use codec::{decode, encode, encode_to_vec, encoded_len};
pub use error::{DecodeError, EncodeError};
pub use header::{
    Code, ContentFormat, MessageType, Method, HEADER_SIZE, MAX_TOKEN_LEN, PAYLOAD_MARKER,
    WIRE_VERSION,
};
pub use message::{Message, RawOption, Token, OPTION_CONTENT_FORMAT, OPTION_URI_PATH};
