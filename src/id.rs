//! Commit identifiers
//!
//! A [`CommitId`] holds up to 20 bytes of hash inline together with the
//! number of significant hex nibbles. Abbreviated ids (as typed by a user or
//! printed by `git log --abbrev`) compare equal to any full id they prefix.
//!
//! Equality is prefix equivalence, so it is not transitive across two
//! different full hashes that share an abbreviation. Tables keyed by
//! `CommitId` only ever mix abbreviated and full forms at lookup time.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GraphError, Result};

/// Maximum id length in bytes (SHA-1)
pub const MAX_ID_BYTES: usize = 20;

/// Shortest accepted hex form
pub const MIN_HEX_LEN: usize = 7;

/// Shortest accepted binary form, the byte length covering `MIN_HEX_LEN`
pub const MIN_ID_BYTES: usize = MIN_HEX_LEN.div_ceil(2);

/// Nibbles fed to the hasher; must not exceed `MIN_HEX_LEN`
const HASHED_NIBBLES: usize = 6;

/// Compact, copyable commit hash
#[derive(Clone, Copy)]
pub struct CommitId {
    bytes: [u8; MAX_ID_BYTES],
    nibbles: u8,
}

impl CommitId {
    /// Parse a hex identifier of 7 to 40 digits
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lanegraph::CommitId;
    ///
    /// let full = CommitId::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904")?;
    /// let short = CommitId::from_hex("4b825dc")?;
    /// assert_eq!(full, short);
    /// assert!(short.is_abbreviated());
    /// # Ok::<(), lanegraph::GraphError>(())
    /// ```
    pub fn from_hex(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.len() < MIN_HEX_LEN || text.len() > MAX_ID_BYTES * 2 {
            return Err(GraphError::InvalidIdentifier(text.to_string()));
        }

        let decoded = if text.len() % 2 == 1 {
            hex::decode(format!("{}0", text))
        } else {
            hex::decode(text)
        }
        .map_err(|_| GraphError::InvalidIdentifier(text.to_string()))?;

        let mut bytes = [0u8; MAX_ID_BYTES];
        bytes[..decoded.len()].copy_from_slice(&decoded);
        Ok(Self {
            bytes,
            nibbles: text.len() as u8,
        })
    }

    /// Build an identifier from raw hash bytes (4 to 20 bytes)
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < MIN_ID_BYTES || raw.len() > MAX_ID_BYTES {
            return Err(GraphError::InvalidIdentifier(hex::encode(raw)));
        }
        let mut bytes = [0u8; MAX_ID_BYTES];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            bytes,
            nibbles: (raw.len() * 2) as u8,
        })
    }

    /// Build a full-length identifier from an integer
    ///
    /// Useful for synthetic histories. The low-order bytes come first so
    /// nearby integers spread across hash buckets.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; MAX_ID_BYTES];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        bytes[8..16].copy_from_slice(&(!value).to_be_bytes());
        Self {
            bytes,
            nibbles: (MAX_ID_BYTES * 2) as u8,
        }
    }

    /// Number of significant hex digits
    pub fn len_nibbles(&self) -> usize {
        self.nibbles as usize
    }

    /// Whether this is a short form of a longer hash
    pub fn is_abbreviated(&self) -> bool {
        self.len_nibbles() < MAX_ID_BYTES * 2
    }

    /// Significant bytes (the last one is half-filled for odd lengths)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len_nibbles().div_ceil(2)]
    }

    /// Seven-digit display form
    pub fn short(&self) -> String {
        let mut text = self.to_string();
        text.truncate(MIN_HEX_LEN);
        text
    }

    /// Check if `self` is a prefix of `other` (or equal to it)
    pub fn is_prefix_of(&self, other: &CommitId) -> bool {
        self.nibbles <= other.nibbles && self == other
    }
}

impl PartialEq for CommitId {
    fn eq(&self, other: &Self) -> bool {
        let common = self.nibbles.min(other.nibbles) as usize;
        let whole = common / 2;
        if self.bytes[..whole] != other.bytes[..whole] {
            return false;
        }
        if common % 2 == 1 {
            return self.bytes[whole] >> 4 == other.bytes[whole] >> 4;
        }
        true
    }
}

impl Eq for CommitId {}

impl Hash for CommitId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Only the prefix every valid id shares, so abbreviated and full forms collide.
        state.write(&self.bytes[..HASHED_NIBBLES / 2]);
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut text = hex::encode(self.as_bytes());
        text.truncate(self.len_nibbles());
        f.write_str(&text)
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.short())
    }
}

impl FromStr for CommitId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        CommitId::from_hex(s)
    }
}

impl Serialize for CommitId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CommitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        CommitId::from_hex(&text).map_err(serde::de::Error::custom)
    }
}
