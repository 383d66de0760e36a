//! Scripted `BlockSource` test double, usable from both in-crate unit
//! tests and the top-level `tests/scenarios.rs`. Paired with
//! [`crate::rpc_source::TokioScheduler`] and `tokio::time::pause`/`advance`
//! (the `test-util` feature), so scenario tests never sleep in real time.

use crate::{
  block::{Block, Hash},
  error::FetchError,
  source::BlockSource,
};
use async_trait::async_trait;
use std::{
  collections::{HashMap, HashSet},
  sync::Mutex,
};

#[derive(Default)]
struct State {
  by_hash: HashMap<Hash, Block>,
  by_number: HashMap<u64, Block>,
  latest: Option<Block>,
  head_number: u64,
  fail_hashes: HashSet<Hash>,
}

/// An in-memory chain a test can append to, query against, and selectively
/// break (to exercise the parent-chase and batch-backfill failure paths).
#[derive(Default)]
pub struct ScriptedSource {
  state: Mutex<State>,
}

impl ScriptedSource {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a block to the chain and, if it's the highest number seen so
  /// far, makes it the new `latest`/head.
  pub fn add(&self, block: Block) {
    let mut state = self.state.lock().unwrap();
    state.by_hash.insert(block.hash, block);
    state.by_number.insert(block.number, block);
    if block.number >= state.head_number {
      state.head_number = block.number;
      state.latest = Some(block);
    }
  }

  /// Sets the reported chain head without requiring the block itself to
  /// have been added, for exercising batch-backfill lag.
  pub fn set_head_number(&self, number: u64) {
    self.state.lock().unwrap().head_number = number;
  }

  /// Makes lookups for `hash` fail with `NotFound`, e.g. to simulate an
  /// unresolvable orphan.
  pub fn fail(&self, hash: Hash) {
    self.state.lock().unwrap().fail_hashes.insert(hash);
  }

  pub fn unfail(&self, hash: Hash) {
    self.state.lock().unwrap().fail_hashes.remove(&hash);
  }
}

#[async_trait]
impl BlockSource for ScriptedSource {
  async fn get_block_by_hash(&self, hash: Hash) -> Result<Block, FetchError> {
    let state = self.state.lock().unwrap();
    if state.fail_hashes.contains(&hash) {
      return Err(FetchError::NotFound);
    }
    state.by_hash.get(&hash).copied().ok_or(FetchError::NotFound)
  }

  async fn get_block_by_number(&self, number: u64) -> Result<Block, FetchError> {
    let state = self.state.lock().unwrap();
    let block = state.by_number.get(&number).copied().ok_or(FetchError::NotFound)?;
    if state.fail_hashes.contains(&block.hash) {
      return Err(FetchError::NotFound);
    }
    Ok(block)
  }

  async fn get_latest_block(&self) -> Result<Block, FetchError> {
    self.state.lock().unwrap().latest.ok_or(FetchError::NotFound)
  }

  async fn get_block_number(&self) -> Result<u64, FetchError> {
    Ok(self.state.lock().unwrap().head_number)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::NULL_HASH;

  #[tokio::test]
  async fn returns_not_found_for_unknown_blocks() {
    let source = ScriptedSource::new();
    assert!(matches!(
      source.get_block_by_hash(Hash::new([1u8; 32])).await,
      Err(FetchError::NotFound)
    ));
  }

  #[tokio::test]
  async fn fail_overrides_a_previously_added_block() {
    let source = ScriptedSource::new();
    let block = Block::new(Hash::new([1u8; 32]), NULL_HASH, 1);
    source.add(block);
    source.fail(block.hash);
    assert!(source.get_block_by_hash(block.hash).await.is_err());
    source.unfail(block.hash);
    assert!(source.get_block_by_hash(block.hash).await.is_ok());
  }
}
