//! Record framing and the anti-replay window.
//!
//! ```text
//! +------+---------+------------------+---------+------------------+
//! | type | epoch   | sequence         | length  | body             |
//! | u8   | u16 BE  | u64 BE           | u16 BE  | length bytes     |
//! +------+---------+------------------+---------+------------------+
//! ```
//!
//! Epoch 0 carries plaintext handshake and alert records. Epoch 1 bodies are
//! AEAD ciphertext with the 13-byte header as associated data.

use bytes::{Buf, BufMut};

/// Header size in bytes
pub const RECORD_HEADER_LEN: usize = 13;

/// Epoch of plaintext records
pub const PLAINTEXT_EPOCH: u16 = 0;

/// Epoch of sealed records
pub const PROTECTED_EPOCH: u16 = 1;

/// Record content types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    /// Alert
    Alert = 21,
    /// Handshake message
    Handshake = 22,
    /// Application data
    ApplicationData = 23,
}

impl TryFrom<u8> for ContentType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            other => Err(other),
        }
    }
}

/// Fixed record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Content type
    pub content_type: ContentType,
    /// Key epoch
    pub epoch: u16,
    /// Per-session write sequence
    pub sequence: u64,
    /// Body length
    pub length: u16,
}

impl RecordHeader {
    /// Serialized header
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut out = [0u8; RECORD_HEADER_LEN];
        let mut cursor = &mut out[..];
        cursor.put_u8(self.content_type as u8);
        cursor.put_u16(self.epoch);
        cursor.put_u64(self.sequence);
        cursor.put_u16(self.length);
        out
    }

    /// AEAD nonce: zero padding, epoch, sequence
    pub fn nonce(&self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[2..4].copy_from_slice(&self.epoch.to_be_bytes());
        nonce[4..].copy_from_slice(&self.sequence.to_be_bytes());
        nonce
    }
}

/// A record with its header and a body
pub fn frame(header: &RecordHeader, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + body.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(body);
    out
}

/// Split the first record off `data`: `(header, body, rest)`
pub fn split_record(data: &[u8]) -> Result<(RecordHeader, &[u8], &[u8]), &'static str> {
    if data.len() < RECORD_HEADER_LEN {
        return Err("shorter than a record header");
    }
    let mut buf = &data[..RECORD_HEADER_LEN];
    let content_type =
        ContentType::try_from(buf.get_u8()).map_err(|_| "unknown content type")?;
    let header = RecordHeader {
        content_type,
        epoch: buf.get_u16(),
        sequence: buf.get_u64(),
        length: buf.get_u16(),
    };

    let body_end = RECORD_HEADER_LEN + header.length as usize;
    if data.len() < body_end {
        return Err("record body truncated");
    }
    Ok((header, &data[RECORD_HEADER_LEN..body_end], &data[body_end..]))
}

/// Sliding window over the last 64 sequence numbers
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    highest: Option<u64>,
    seen: u64,
}

impl ReplayWindow {
    const SIZE: u64 = 64;

    /// Whether `sequence` is new and inside the window
    pub fn check(&self, sequence: u64) -> bool {
        match self.highest {
            None => true,
            Some(highest) if sequence > highest => true,
            Some(highest) => {
                let offset = highest - sequence;
                offset < Self::SIZE && self.seen & (1 << offset) == 0
            }
        }
    }

    /// Mark `sequence` as seen; call only after the record authenticated
    pub fn update(&mut self, sequence: u64) {
        match self.highest {
            None => {
                self.highest = Some(sequence);
                self.seen = 1;
            }
            Some(highest) if sequence > highest => {
                let shift = sequence - highest;
                self.seen = if shift >= Self::SIZE { 1 } else { (self.seen << shift) | 1 };
                self.highest = Some(sequence);
            }
            Some(highest) => {
                let offset = highest - sequence;
                if offset < Self::SIZE {
                    self.seen |= 1 << offset;
                }
            }
        }
    }
}
