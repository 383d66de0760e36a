//! The single domain entity tracked by the watcher: an immutable identity
//! (hash, parentHash, number) plus the one field the tree engine is allowed
//! to mutate, `child_depth`.

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Opaque 32-byte block identifier. Stringifies as `0x` + 64 lowercase hex
/// characters, the same convention Ethereum JSON-RPC uses for `hash` and
/// `parentHash`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; 32]);

/// The distinguished parent hash of a genesis / anchor block: "no parent".
pub const NULL_HASH: Hash = Hash([0u8; 32]);

impl Hash {
  pub fn new(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub fn is_null(&self) -> bool {
    self.0 == [0u8; 32]
  }
}

impl fmt::Display for Hash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "0x{}", hex::encode(self.0))
  }
}

impl fmt::Debug for Hash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Hash({self})")
  }
}

#[derive(Debug, Error, Clone)]
pub enum HashParseError {
  #[error("hash must be a 0x-prefixed 64 character hex string, got {0:?}")]
  InvalidFormat(String),
}

impl FromStr for Hash {
  type Err = HashParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let stripped = s
      .strip_prefix("0x")
      .ok_or_else(|| HashParseError::InvalidFormat(s.to_owned()))?;
    if stripped.len() != 64 {
      return Err(HashParseError::InvalidFormat(s.to_owned()));
    }
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(stripped, &mut bytes)
      .map_err(|_| HashParseError::InvalidFormat(s.to_owned()))?;
    Ok(Hash(bytes))
  }
}

impl Serialize for Hash {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Hash {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(D::Error::custom)
  }
}

/// A block known to the tree. Identity (`hash`, `parent_hash`, `number`) is
/// set once at creation; `child_depth` is the only field the tree engine
/// ever mutates after insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
  pub hash: Hash,
  pub parent_hash: Hash,
  pub number: u64,
  pub child_depth: u64,
}

impl Block {
  /// Constructs a freshly observed block. `child_depth` always starts at
  /// zero; the tree engine is the only thing that ever raises it.
  pub fn new(hash: Hash, parent_hash: Hash, number: u64) -> Self {
    Self {
      hash,
      parent_hash,
      number,
      child_depth: 0,
    }
  }

  /// True if this block claims to have no parent (the chain's genesis).
  pub fn is_root_claim(&self) -> bool {
    self.parent_hash.is_null()
  }
}

impl fmt::Display for Block {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{} {}", self.number, self.hash)
  }
}
