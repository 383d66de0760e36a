//! `chainwatch`: tracks a remote chain's head, backfills gaps in a lossy
//! block stream, and emits reorg-aware `add`/`confirm`/`rollback`/`live`
//! events over a bounded window of recent blocks.
//!
//! The entry point is [`watcher::Watcher`]: construct one from a
//! [`source::BlockSource`], a [`source::Scheduler`], and a
//! [`config::WatcherConfig`], register listeners via [`watcher::Watcher::on`]
//! / [`watcher::Watcher::once`] / [`watcher::Watcher::promise`], then spawn
//! [`watcher::Watcher::run`].

pub mod backfill;
pub mod block;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod queue;
pub mod rpc_source;
pub mod snapshot;
pub mod source;
pub mod tree;
pub mod watcher;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;

pub use block::{Block, Hash};
pub use config::{Anchor, WatcherConfig};
pub use error::{Cancelled, ConfigError, FetchError};
pub use events::{Event, Topic};
pub use snapshot::{Snapshot, SnapshotRecord};
pub use watcher::Watcher;
