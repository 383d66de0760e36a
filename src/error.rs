//! Error taxonomy, grouped by concern the way `episub::error` groups the
//! network layer's errors into small per-concern enums instead of one
//! catch-all.

use thiserror::Error;

/// Returned synchronously by [`crate::config::WatcherConfig`] construction.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("specify at most one of fromSnapshot, fromBlockHash, fromBlockNumber")]
  MultipleAnchors,

  #[error("numConfirmations ({confirmations}) must be less than streamSize ({stream_size})")]
  ConfirmationsExceedStreamSize { confirmations: u64, stream_size: u64 },

  #[error("failed to parse watcher configuration: {0}")]
  Parse(String),
}

/// The `Err` type of every [`crate::source::BlockSource`] call. Treated as
/// transient everywhere except anchor resolution and parent-chase, where
/// `NotFound` distinguishes "the call failed" from "the call succeeded and
/// reported no such block".
#[derive(Debug, Error, Clone)]
pub enum FetchError {
  #[error("block not found")]
  NotFound,

  #[error("request timed out")]
  Timeout,

  #[error("transport error: {0}")]
  Transport(String),
}

impl From<std::io::Error> for FetchError {
  fn from(err: std::io::Error) -> Self {
    FetchError::Transport(err.to_string())
  }
}

/// Returned by [`crate::watcher::Watcher::add_block`] when the staged block
/// was rolled back or dropped as an unresolvable orphan before it could be
/// inserted. See DESIGN.md for why we reject rather than leak these.
#[derive(Debug, Error, Clone, Copy)]
#[error("block was rolled back or dropped before it could be inserted")]
pub struct Cancelled;
