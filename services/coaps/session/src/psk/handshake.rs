//! Handshake messages and the key schedule.

use crate::error::HandshakeFailure;
use crate::psk::record::RecordHeader;
use bytes::{Buf, BufMut};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Hello random size
pub const RANDOM_LEN: usize = 32;

/// Finished verify data size
pub const VERIFY_LEN: usize = 32;

/// Largest key the engine will ask the credential store for
pub const MAX_PSK_LEN: usize = 64;

/// Longest identity whose ClientHello still fits one record
pub const MAX_IDENTITY_LEN: usize = u16::MAX as usize - 1 - RANDOM_LEN - 2;

/// AEAD tag size
pub const TAG_LEN: usize = 16;

const KEY_LEN: usize = 32;
const KEY_SCHEDULE_INFO: &[u8] = b"coaps psk record keys";
const CLIENT_FINISHED: &[u8] = b"client finished";
const SERVER_FINISHED: &[u8] = b"server finished";

const CLIENT_HELLO: u8 = 1;
const SERVER_HELLO: u8 = 2;
const FINISHED: u8 = 20;

/// Handshake messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// Client opens with its random and PSK identity
    ClientHello {
        /// Client random
        random: [u8; RANDOM_LEN],
        /// PSK identity
        identity: Vec<u8>,
    },
    /// Server answers with its random
    ServerHello {
        /// Server random
        random: [u8; RANDOM_LEN],
    },
    /// Transcript proof, always sent sealed
    Finished {
        /// Hash over label and transcript
        verify: [u8; VERIFY_LEN],
    },
}

impl HandshakeMessage {
    /// Serialize; identities longer than `u16::MAX` are cut at that length
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            HandshakeMessage::ClientHello { random, identity } => {
                let identity = &identity[..identity.len().min(u16::MAX as usize)];
                out.put_u8(CLIENT_HELLO);
                out.put_slice(random);
                out.put_u16(identity.len() as u16);
                out.put_slice(identity);
            }
            HandshakeMessage::ServerHello { random } => {
                out.put_u8(SERVER_HELLO);
                out.put_slice(random);
            }
            HandshakeMessage::Finished { verify } => {
                out.put_u8(FINISHED);
                out.put_slice(verify);
            }
        }
        out
    }

    /// Parse one message occupying all of `body`
    pub fn decode(body: &[u8]) -> Result<Self, &'static str> {
        let mut buf = body;
        if !buf.has_remaining() {
            return Err("empty handshake message");
        }
        match buf.get_u8() {
            CLIENT_HELLO => {
                if buf.remaining() < RANDOM_LEN + 2 {
                    return Err("client hello truncated");
                }
                let mut random = [0u8; RANDOM_LEN];
                buf.copy_to_slice(&mut random);
                let len = buf.get_u16() as usize;
                if buf.remaining() != len {
                    return Err("client hello identity length mismatch");
                }
                Ok(HandshakeMessage::ClientHello {
                    random,
                    identity: buf.to_vec(),
                })
            }
            SERVER_HELLO => {
                if buf.remaining() != RANDOM_LEN {
                    return Err("server hello length mismatch");
                }
                let mut random = [0u8; RANDOM_LEN];
                buf.copy_to_slice(&mut random);
                Ok(HandshakeMessage::ServerHello { random })
            }
            FINISHED => {
                if buf.remaining() != VERIFY_LEN {
                    return Err("finished length mismatch");
                }
                let mut verify = [0u8; VERIFY_LEN];
                buf.copy_to_slice(&mut verify);
                Ok(HandshakeMessage::Finished { verify })
            }
            _ => Err("unknown handshake message"),
        }
    }
}

/// Fresh hello random from the OS
pub fn fresh_random() -> [u8; RANDOM_LEN] {
    let mut random = [0u8; RANDOM_LEN];
    OsRng.fill_bytes(&mut random);
    random
}

/// Hash of both hellos as they went on the wire
pub fn transcript_hash(client_hello: &[u8], server_hello: &[u8]) -> [u8; 32] {
    Sha256::new()
        .chain_update(client_hello)
        .chain_update(server_hello)
        .finalize()
        .into()
}

/// Verify data the client puts in its Finished
pub fn client_verify(transcript: &[u8; 32]) -> [u8; VERIFY_LEN] {
    verify_data(CLIENT_FINISHED, transcript)
}

/// Verify data the server puts in its Finished
pub fn server_verify(transcript: &[u8; 32]) -> [u8; VERIFY_LEN] {
    verify_data(SERVER_FINISHED, transcript)
}

fn verify_data(label: &[u8], transcript: &[u8; 32]) -> [u8; VERIFY_LEN] {
    Sha256::new()
        .chain_update(label)
        .chain_update(transcript)
        .finalize()
        .into()
}

/// Which end of the handshake we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Sent the ClientHello
    Client,
    /// Answered it
    Server,
}

/// Directional AEAD keys for one session
pub struct SessionKeys {
    seal: ChaCha20Poly1305,
    open: ChaCha20Poly1305,
}

impl SessionKeys {
    /// HKDF-SHA256 over the PSK, salted with both randoms
    pub fn derive(
        psk: &[u8],
        client_random: &[u8; RANDOM_LEN],
        server_random: &[u8; RANDOM_LEN],
        side: Side,
    ) -> Result<Self, HandshakeFailure> {
        let mut salt = [0u8; 2 * RANDOM_LEN];
        salt[..RANDOM_LEN].copy_from_slice(client_random);
        salt[RANDOM_LEN..].copy_from_slice(server_random);

        let mut okm = Zeroizing::new([0u8; 2 * KEY_LEN]);
        Hkdf::<Sha256>::new(Some(&salt[..]), psk)
            .expand(KEY_SCHEDULE_INFO, &mut okm[..])
            .map_err(|_| HandshakeFailure::KeyDerivation)?;

        let client_write = ChaCha20Poly1305::new_from_slice(&okm[..KEY_LEN])
            .map_err(|_| HandshakeFailure::KeyDerivation)?;
        let server_write = ChaCha20Poly1305::new_from_slice(&okm[KEY_LEN..])
            .map_err(|_| HandshakeFailure::KeyDerivation)?;

        Ok(match side {
            Side::Client => Self {
                seal: client_write,
                open: server_write,
            },
            Side::Server => Self {
                seal: server_write,
                open: client_write,
            },
        })
    }

    /// Encrypt `plaintext` for a record with `header`
    pub fn seal(&self, header: &RecordHeader, plaintext: &[u8]) -> Option<Vec<u8>> {
        let aad = header.to_bytes();
        let nonce = header.nonce();
        self.seal
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .ok()
    }

    /// Decrypt and authenticate a record body
    pub fn open(&self, header: &RecordHeader, ciphertext: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        let aad = header.to_bytes();
        let nonce = header.nonce();
        self.open
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .ok()
            .map(Zeroizing::new)
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}
