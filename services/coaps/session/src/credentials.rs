//! Pre-shared key store consulted during handshakes.

use crate::error::CredentialError;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Key material kinds an engine may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Identity hint a server advertises
    PskHint,
    /// Identity a client presents
    PskIdentity,
    /// The shared key for an identity
    PskKey,
}

/// One identity/key pair
#[derive(Clone)]
pub struct CredentialEntry {
    identity: Vec<u8>,
    key: Zeroizing<Vec<u8>>,
}

impl CredentialEntry {
    /// Create an entry
    pub fn new(identity: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            identity: identity.into(),
            key: Zeroizing::new(key.into()),
        }
    }

    /// Identity bytes
    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        self.key.len()
    }

    fn matches(&self, identity: &[u8]) -> bool {
        self.identity.len() == identity.len() && bool::from(self.identity.ct_eq(identity))
    }
}

impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("identity", &String::from_utf8_lossy(&self.identity))
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Read-only identity to key table, fixed at start-up
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: Vec<CredentialEntry>,
}

impl CredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding a single identity/key pair
    pub fn single(identity: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self::new().with_entry(CredentialEntry::new(identity, key))
    }

    /// Add an entry
    pub fn with_entry(mut self, entry: CredentialEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identity of the first entry, presented by a client
    pub fn default_identity(&self) -> Option<&[u8]> {
        self.entries.first().map(CredentialEntry::identity)
    }

    /// Copy the key for `identity` into `out`.
    ///
    /// Returns the number of bytes written. Kinds other than
    /// [`CredentialKind::PskKey`] produce `Ok(0)`: no credential, but not an
    /// error either. Identity match is exact (same length, same bytes).
    pub fn lookup(
        &self,
        kind: CredentialKind,
        identity: &[u8],
        out: &mut [u8],
    ) -> Result<usize, CredentialError> {
        if kind != CredentialKind::PskKey {
            return Ok(0);
        }

        let entry = self
            .entries
            .iter()
            .find(|entry| entry.matches(identity))
            .ok_or(CredentialError::CredentialNotFound)?;

        if out.len() < entry.key.len() {
            return Err(CredentialError::BufferTooSmall {
                needed: entry.key.len(),
                capacity: out.len(),
            });
        }

        out[..entry.key.len()].copy_from_slice(&entry.key);
        Ok(entry.key.len())
    }
}
