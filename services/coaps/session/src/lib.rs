//! Secure-session multiplexing for the coaps gateway.
//!
//! One bound datagram socket is shared by every peer. A
//! [`SecureSessionEngine`] keeps per-peer session state and calls back into a
//! [`TransportBridge`], which owns the socket, answers requests through the
//! protocol dispatcher and consults the [`CredentialStore`] during handshakes.
//!
//! ## Components
//!
//! - **Credential Store**: identity to pre-shared key lookup
//! - **Socket Binding**: shared socket whose remote peer is pinned for one send at a time
//! - **Transport Bridge**: the engine's callback table
//! - **Read Pump**: exactly one datagram per readiness notification
//! - **Client Loop**: drift-free periodic requests to a fixed peer
//! - **Engines**: [`PskEngine`] (sealed records) and [`NoSecEngine`] (plaintext)
//!
//! ## Example
//!
//! ```rust,no_run
//! use coaps_dispatch::{register_defaults, local_clock, Dispatcher, ResourceTable};
//! use coaps_session::{
//!     BridgeRole, CredentialStore, PskConfig, PskEngine, ReadPump, TransportBridge,
//! };
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let socket = Arc::new(tokio::net::UdpSocket::bind("[::]:6666").await?);
//! let mut table = ResourceTable::new();
//! register_defaults(&mut table, local_clock)?;
//!
//! let bridge = TransportBridge::new(
//!     socket.clone(),
//!     CredentialStore::single("Client_identity", "secretPSK"),
//!     BridgeRole::Server(Dispatcher::new(table)),
//!     256,
//! );
//! let mut engine = PskEngine::new(bridge, PskConfig::default());
//! let mut pump = ReadPump::new(1280);
//!
//! loop {
//!     socket.readable().await?;
//!     pump.on_datagram_available(&mut engine, Instant::now());
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod client;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod memory;
pub mod nosec;
pub mod psk;
pub mod pump;
pub mod socket;
pub mod stats;

#[cfg(test)]
mod testing;

pub use bridge::{BridgeRole, TransportBridge};
pub use client::{ClientError, ClientLoop, ClientRequest, PeriodicTimer, SendRecord};
pub use credentials::{CredentialEntry, CredentialKind, CredentialStore};
pub use engine::{
    AlertDescription, EventCode, EventLevel, Reply, SecureSessionEngine, SessionHandler, SessionId,
};
pub use error::{CredentialError, EngineError, HandshakeFailure, NotHandled};
pub use memory::{Datagram, MemoryNetwork, MemorySocket};
pub use nosec::NoSecEngine;
pub use psk::{PskConfig, PskEngine, PskRole};
pub use pump::{PumpOutcome, ReadPump};
pub use socket::{DatagramSocket, RemoteBinding, SocketBinding};
pub use stats::BridgeStats;
