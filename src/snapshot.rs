//! Serializable snapshot format used to restore a watcher's tree without
//! replaying history through a `BlockSource`.

use crate::block::Hash;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
  pub hash: Hash,
  #[serde(rename = "parentHash")]
  pub parent_hash: Hash,
  pub number: u64,
  #[serde(rename = "childDepth")]
  pub child_depth: u64,
}

pub type Snapshot = Vec<SnapshotRecord>;
