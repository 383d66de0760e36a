//! The two external capabilities the watcher consumes: a source of blocks
//! and a clock to schedule retries/polling against, expressed as
//! `async_trait` boundary traits between the engine and the outside world.
//!
//! A callback-based `Scheduler::after(duration, callback) -> CancelHandle`
//! would duplicate what async Rust already gives for free: cancellation is
//! structural, dropping a future cancels it. A single `sleep` method gets
//! the same cancellation behavior from `tokio::select!`/drop without a
//! bespoke handle type.

use crate::{block::Block, error::FetchError};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait BlockSource: Send + Sync {
  async fn get_block_by_hash(&self, hash: crate::block::Hash) -> Result<Block, FetchError>;
  async fn get_block_by_number(&self, number: u64) -> Result<Block, FetchError>;
  async fn get_latest_block(&self) -> Result<Block, FetchError>;
  async fn get_block_number(&self) -> Result<u64, FetchError>;
}

#[async_trait]
pub trait Scheduler: Send + Sync {
  async fn sleep(&self, duration: Duration);
}
