//! Watcher configuration: stream/confirmation sizing, timing knobs, and the
//! anchor the tree is seeded from. Durations use `humantime_serde` so JSON
//! config files can write `"1s"` instead of nanosecond counts.

use crate::{block::Hash, error::ConfigError, snapshot::Snapshot};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the tree's root block comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Anchor {
  /// Restore a previously taken snapshot wholesale.
  Snapshot(Snapshot),
  /// Fetch this specific block by hash and seed the tree with it.
  BlockHash(Hash),
  /// Fetch this specific block by number and seed the tree with it.
  BlockNumber(u64),
  /// Fetch the chain head and back up `streamSize` blocks from it.
  None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
  pub stream_size: u64,
  pub num_confirmations: u64,
  pub max_backfills: u64,
  pub batch_size: u64,
  #[serde(with = "humantime_serde")]
  pub poll_delay: Duration,
  #[serde(with = "humantime_serde")]
  pub fetch_timeout: Duration,
  #[serde(with = "humantime_serde")]
  pub batch_timeout: Duration,
  #[serde(skip)]
  pub anchor: Anchor,
  /// Free-form label used only in log fields; no effect on behavior.
  pub label: String,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self {
      stream_size: 12,
      num_confirmations: 5,
      // Open Question resolution (DESIGN.md): defaults to streamSize, not
      // streamSize + 1.
      max_backfills: 12,
      batch_size: 100,
      poll_delay: Duration::from_secs(1),
      fetch_timeout: Duration::from_secs(2),
      batch_timeout: Duration::from_secs(5),
      anchor: Anchor::None,
      label: "chain".to_owned(),
    }
  }
}

impl Default for Anchor {
  fn default() -> Self {
    Anchor::None
  }
}

impl WatcherConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.num_confirmations >= self.stream_size {
      return Err(ConfigError::ConfirmationsExceedStreamSize {
        confirmations: self.num_confirmations,
        stream_size: self.stream_size,
      });
    }
    Ok(())
  }

  /// Parses a JSON config document (the on-disk shape, with the anchor
  /// expressed as mutually exclusive optional fields) into a validated
  /// `WatcherConfig`.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    let raw: RawConfig =
      serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let config = WatcherConfig::try_from(raw)?;
    config.validate()?;
    Ok(config)
  }
}

/// The on-disk / wire shape: JSON has no sum types, so the four anchor
/// variants are four optional fields that must collapse to exactly one
/// [`Anchor`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawConfig {
  stream_size: Option<u64>,
  num_confirmations: Option<u64>,
  max_backfills: Option<u64>,
  batch_size: Option<u64>,
  #[serde(with = "humantime_serde::option", default)]
  poll_delay: Option<Duration>,
  #[serde(with = "humantime_serde::option", default)]
  fetch_timeout: Option<Duration>,
  #[serde(with = "humantime_serde::option", default)]
  batch_timeout: Option<Duration>,
  label: Option<String>,
  from_snapshot: Option<Snapshot>,
  from_block_hash: Option<Hash>,
  from_block_number: Option<u64>,
}

impl TryFrom<RawConfig> for WatcherConfig {
  type Error = ConfigError;

  fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
    let anchors_set = [
      raw.from_snapshot.is_some(),
      raw.from_block_hash.is_some(),
      raw.from_block_number.is_some(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count();
    if anchors_set > 1 {
      return Err(ConfigError::MultipleAnchors);
    }
    let anchor = if let Some(snapshot) = raw.from_snapshot {
      Anchor::Snapshot(snapshot)
    } else if let Some(hash) = raw.from_block_hash {
      Anchor::BlockHash(hash)
    } else if let Some(number) = raw.from_block_number {
      Anchor::BlockNumber(number)
    } else {
      Anchor::None
    };

    let defaults = WatcherConfig::default();
    Ok(WatcherConfig {
      stream_size: raw.stream_size.unwrap_or(defaults.stream_size),
      num_confirmations: raw.num_confirmations.unwrap_or(defaults.num_confirmations),
      max_backfills: raw.max_backfills.unwrap_or(defaults.max_backfills),
      batch_size: raw.batch_size.unwrap_or(defaults.batch_size),
      poll_delay: raw.poll_delay.unwrap_or(defaults.poll_delay),
      fetch_timeout: raw.fetch_timeout.unwrap_or(defaults.fetch_timeout),
      batch_timeout: raw.batch_timeout.unwrap_or(defaults.batch_timeout),
      anchor,
      label: raw.label.unwrap_or(defaults.label),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_validates() {
    assert!(WatcherConfig::default().validate().is_ok());
  }

  #[test]
  fn confirmations_must_be_below_stream_size() {
    let mut config = WatcherConfig::default();
    config.num_confirmations = config.stream_size;
    assert!(matches!(
      config.validate(),
      Err(ConfigError::ConfirmationsExceedStreamSize { .. })
    ));
  }

  #[test]
  fn rejects_multiple_anchors() {
    let json = r#"{"fromBlockNumber": 10, "fromBlockHash": "0x000000000000000000000000000000000000000000000000000000000000000a"}"#;
    assert!(matches!(
      WatcherConfig::from_json(json),
      Err(ConfigError::MultipleAnchors)
    ));
  }

  #[test]
  fn parses_block_number_anchor() {
    let json = r#"{"fromBlockNumber": 42, "pollDelay": "1s"}"#;
    let config = WatcherConfig::from_json(json).unwrap();
    assert_eq!(config.anchor, Anchor::BlockNumber(42));
  }
}
