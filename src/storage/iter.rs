//! Backward chain iterator
//!
//! A lazy, finite, non-restartable cursor from the tip down to genesis.

use super::{Blockchain, StorageError};
use crate::consensus::Block;
use crate::crypto::Hash;

/// Cursor over the chain, newest block first. Borrows the store; yields
/// owned blocks and ends after the block with a zero previous hash.
pub struct ChainIter<'a> {
    chain: &'a Blockchain,
    current: Option<Hash>,
}

impl<'a> ChainIter<'a> {
    pub(super) fn new(chain: &'a Blockchain, tip: Hash) -> Self {
        Self {
            chain,
            current: Some(tip),
        }
    }
}

impl Iterator for ChainIter<'_> {
    type Item = Result<Block, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;
        match self.chain.get_block(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current = Some(block.prev_hash);
                }
                Some(Ok(block))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
