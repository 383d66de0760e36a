//! The block tree: a flat, hash-indexed container of every block the engine
//! currently retains. It has no opinion on insertion order, gaps, or
//! confirmation — that's the tree engine's job. This module only holds
//! blocks and answers lookups.

use crate::block::{Block, Hash};
use std::collections::hash_map::{HashMap, Values};

/// Hash-indexed set of retained blocks.
#[derive(Debug, Default)]
pub struct BlockTree {
  blocks: HashMap<Hash, Block>,
}

impl BlockTree {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, hash: &Hash) -> Option<&Block> {
    self.blocks.get(hash)
  }

  pub fn get_mut(&mut self, hash: &Hash) -> Option<&mut Block> {
    self.blocks.get_mut(hash)
  }

  pub fn contains(&self, hash: &Hash) -> bool {
    self.blocks.contains_key(hash)
  }

  /// Inserts or overwrites a block by hash.
  pub fn insert(&mut self, block: Block) {
    self.blocks.insert(block.hash, block);
  }

  pub fn remove(&mut self, hash: &Hash) -> Option<Block> {
    self.blocks.remove(hash)
  }

  pub fn iter(&self) -> Values<'_, Hash, Block> {
    self.blocks.values()
  }

  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::NULL_HASH;

  fn h(n: u8) -> Hash {
    Hash::new([n; 32])
  }

  #[test]
  fn insert_then_get_roundtrips() {
    let mut tree = BlockTree::new();
    let block = Block::new(h(1), NULL_HASH, 0);
    tree.insert(block);
    assert_eq!(tree.get(&h(1)), Some(&block));
    assert!(tree.contains(&h(1)));
    assert_eq!(tree.len(), 1);
  }

  #[test]
  fn remove_drops_the_block() {
    let mut tree = BlockTree::new();
    tree.insert(Block::new(h(1), NULL_HASH, 0));
    assert!(tree.remove(&h(1)).is_some());
    assert!(!tree.contains(&h(1)));
    assert!(tree.is_empty());
  }

  #[test]
  fn get_mut_allows_child_depth_updates() {
    let mut tree = BlockTree::new();
    tree.insert(Block::new(h(1), NULL_HASH, 0));
    tree.get_mut(&h(1)).unwrap().child_depth = 3;
    assert_eq!(tree.get(&h(1)).unwrap().child_depth, 3);
  }
}
