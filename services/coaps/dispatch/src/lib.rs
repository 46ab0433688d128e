//! Resource tables and request dispatch for coaps.
//!
//! A [`ResourceTable`] maps Uri-Path segments to handlers. The [`Dispatcher`]
//! turns one decoded request into exactly one response message, answering
//! 4.04 for unknown paths and 4.05 for methods a resource does not accept.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use coaps_dispatch::{Dispatcher, HandlerResponse, Methods, Resource, ResourceTable};
//! use coaps_wire::{Code, ContentFormat, Message, MessageType};
//!
//! let mut table = ResourceTable::new();
//! table
//!     .register(Resource::new("time", Methods::GET, |_method, _payload: &[u8]| {
//!         HandlerResponse::content(ContentFormat::TEXT_PLAIN, Bytes::from_static(b"12:00"))
//!     }))
//!     .unwrap();
//!
//! let dispatcher = Dispatcher::new(table);
//! let request = Message::request(MessageType::Confirmable, Code::GET, 1).with_path("time");
//! let response = dispatcher.dispatch(&request);
//! assert_eq!(response.code, Code::CONTENT);
//! assert_eq!(&response.payload[..], b"12:00");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builtin;
pub mod dispatcher;
pub mod error;
pub mod resource;

// Re-export main types
pub use builtin::{
    hello_resource, local_clock, register_defaults, time_resource, well_known_core, WELL_KNOWN_CORE,
};
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use resource::{HandlerResponse, Methods, Resource, ResourceHandler, ResourceTable};
