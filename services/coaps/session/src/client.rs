//! Periodic client requests towards one fixed peer.
//!
//! Rescheduling is relative to timer expiry, so the period does not stretch
//! with send latency. When the host falls more than a period behind, the
//! missed fires are skipped instead of sent in a burst.

use crate::engine::SecureSessionEngine;
use crate::error::EngineError;
use bytes::Bytes;
use coaps_wire::{encode, EncodeError, Message, MessageType, Method};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Shortest period the timer accepts
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Fixed-period deadline
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    period: Duration,
    deadline: Instant,
}

impl PeriodicTimer {
    /// First fire at `start + period`
    pub fn new(start: Instant, period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        Self {
            period,
            deadline: start + period,
        }
    }

    /// Timer period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Next fire time
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the deadline has passed
    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Advance past `now` by whole periods; returns how many fires were skipped
    pub fn reset(&mut self, now: Instant) -> u32 {
        self.deadline += self.period;
        let mut skipped = 0;
        while self.deadline <= now {
            self.deadline += self.period;
            skipped += 1;
        }
        skipped
    }
}

/// The request the client sends every period
#[derive(Debug, Clone)]
pub struct ClientRequest {
    /// Method
    pub method: Method,
    /// Uri-Path, slash separated
    pub path: String,
    /// Send as confirmable
    pub confirmable: bool,
    /// Request payload
    pub payload: Bytes,
}

impl ClientRequest {
    /// Confirmable GET for `path`
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::Get,
            path: path.to_string(),
            confirmable: true,
            payload: Bytes::new(),
        }
    }
}

/// What one fire produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRecord {
    /// Message ID used
    pub message_id: u16,
    /// When the fire was due
    pub scheduled: Instant,
    /// When the bytes were handed to the engine
    pub sent_at: Instant,
    /// Encoded request size
    pub len: usize,
    /// Fires skipped because the host fell behind
    pub skipped: u32,
}

/// Client loop failures; each affects only one fire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Request does not fit the request buffer
    #[error("request encoding failed: {0}")]
    Encode(#[from] EncodeError),

    /// Engine refused the plaintext
    #[error("send failed: {0}")]
    Engine(#[from] EngineError),
}

/// Builds and sends one request per timer period
#[derive(Debug)]
pub struct ClientLoop {
    peer: SocketAddr,
    timer: PeriodicTimer,
    request: ClientRequest,
    next_message_id: u16,
    request_buf: Vec<u8>,
    sent: u64,
}

impl ClientLoop {
    /// Create a loop whose first fire is one period after `start`
    pub fn new(
        peer: SocketAddr,
        period: Duration,
        request: ClientRequest,
        start: Instant,
        request_capacity: usize,
    ) -> Self {
        Self {
            peer,
            timer: PeriodicTimer::new(start, period),
            request,
            next_message_id: rand::random(),
            request_buf: vec![0u8; request_capacity],
            sent: 0,
        }
    }

    /// Start message IDs at `message_id`
    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.next_message_id = message_id;
        self
    }

    /// Configured peer
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Next fire time
    pub fn deadline(&self) -> Instant {
        self.timer.deadline()
    }

    /// Requests handed to the engine so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Fire if due.
    ///
    /// `Ok(None)` when the deadline has not passed. The timer is rescheduled on
    /// every fire, including failed ones.
    pub fn poll<E: SecureSessionEngine>(
        &mut self,
        engine: &mut E,
        now: Instant,
    ) -> Result<Option<SendRecord>, ClientError> {
        if !self.timer.expired(now) {
            return Ok(None);
        }
        let scheduled = self.timer.deadline();
        let skipped = self.timer.reset(now);
        if skipped > 0 {
            warn!("Client loop fell behind, skipped {} sends", skipped);
        }

        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        let mtype = if self.request.confirmable {
            MessageType::Confirmable
        } else {
            MessageType::NonConfirmable
        };
        let message = Message::request(mtype, self.request.method.code(), message_id)
            .with_token(&message_id.to_be_bytes())
            .with_path(&self.request.path)
            .with_payload(self.request.payload.clone());

        let len = encode(&message, &mut self.request_buf)?;
        engine.send_plaintext(self.peer, &self.request_buf[..len], now)?;
        self.sent += 1;
        debug!(
            "Sent {} /{} to {} (mid {:#06x})",
            self.request.method, self.request.path, self.peer, message_id
        );

        Ok(Some(SendRecord {
            message_id,
            scheduled,
            sent_at: now,
            len,
            skipped,
        }))
    }
}
