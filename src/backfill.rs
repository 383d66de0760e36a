//! Backfill coordinator: fetches a single missing parent (parent-chase
//! mode, driven by the engine reporting a gap) or a run of old blocks in
//! bulk (batch-backfill mode, driven by the watcher noticing it's lagging
//! far behind the chain head).

use crate::{block::Block, config::WatcherConfig, error::FetchError, source::BlockSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct BackfillCoordinator {
  config: WatcherConfig,
  adding_old_blocks: AtomicBool,
}

impl BackfillCoordinator {
  pub fn new(config: WatcherConfig) -> Self {
    Self {
      config,
      adding_old_blocks: AtomicBool::new(false),
    }
  }

  /// Fetches the single missing parent for a gap, bounded by `fetchTimeout`.
  pub async fn parent_chase(
    &self,
    source: &dyn BlockSource,
    missing: crate::block::Hash,
  ) -> Result<Block, FetchError> {
    match tokio::time::timeout(self.config.fetch_timeout, source.get_block_by_hash(missing)).await
    {
      Ok(result) => result,
      Err(_) => Err(FetchError::Timeout),
    }
  }

  /// True once the chain head has pulled far enough ahead that parent-chase
  /// alone would be too slow to catch up.
  pub fn needs_batch_backfill(&self, head: u64, max_block_number: u64) -> bool {
    head > max_block_number + self.config.max_backfills
  }

  /// The next contiguous range to fetch in one batch, or `None` if the
  /// engine has already caught up to within `maxBackfills` of `head`.
  pub fn next_batch_range(&self, head: u64, max_block_number: u64) -> Option<(u64, u64)> {
    if !self.needs_batch_backfill(head, max_block_number) {
      return None;
    }
    let from = max_block_number + 1;
    let to = head
      .saturating_sub(self.config.max_backfills)
      .min(max_block_number + self.config.batch_size);
    if to < from {
      None
    } else {
      Some((from, to))
    }
  }

  /// Fetches `from..=to` in parallel, bounded by `batchTimeout` for the
  /// whole batch.
  pub async fn fetch_batch(
    &self,
    source: &dyn BlockSource,
    from: u64,
    to: u64,
  ) -> Result<Vec<Block>, FetchError> {
    let fetches = (from..=to).map(|number| source.get_block_by_number(number));
    match tokio::time::timeout(self.config.batch_timeout, futures::future::join_all(fetches))
      .await
    {
      Ok(results) => results.into_iter().collect(),
      Err(_) => Err(FetchError::Timeout),
    }
  }

  /// Non-reentrancy guard: only one batch backfill may run at a time.
  /// Returns `false` if one is already in progress.
  pub fn try_begin_batch(&self) -> bool {
    !self.adding_old_blocks.swap(true, Ordering::SeqCst)
  }

  pub fn end_batch(&self) {
    self.adding_old_blocks.store(false, Ordering::SeqCst);
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(3)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn batch_range_is_bounded_by_batch_size_and_max_backfills() {
    let coordinator = BackfillCoordinator::new(WatcherConfig {
      max_backfills: 12,
      batch_size: 100,
      ..WatcherConfig::default()
    });
    // 150 behind: first cycle pulls 100, leaving 38 after maxBackfills slack.
    assert_eq!(coordinator.next_batch_range(150, 0), Some((1, 100)));
    assert_eq!(coordinator.next_batch_range(150, 100), Some((101, 138)));
    assert_eq!(coordinator.next_batch_range(150, 138), None);
  }

  #[test]
  fn reentrancy_guard_blocks_a_second_batch() {
    let coordinator = BackfillCoordinator::new(WatcherConfig::default());
    assert!(coordinator.try_begin_batch());
    assert!(!coordinator.try_begin_batch());
    coordinator.end_batch();
    assert!(coordinator.try_begin_batch());
  }
}
