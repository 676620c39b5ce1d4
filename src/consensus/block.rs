//! Block structure
//!
//! A block is sealed once by the proof-of-work search and never mutated
//! afterwards.

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::consensus::ProofOfWork;
use crate::crypto::{Hash, MerkleError};
use crate::validation::Transaction;

/// Block sealing and validation errors
#[derive(Debug, Error)]
pub enum BlockError {
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error("nonce search interrupted")]
    Interrupted,
}

/// A sealed block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Seconds since the Unix epoch at sealing time
    pub timestamp: u64,
    /// Ordered, non-empty transaction list; the coinbase is always present
    pub transactions: Vec<Transaction>,
    /// Hash of the previous block; zero for genesis
    pub prev_hash: Hash,
    /// Nonce found by the proof-of-work search
    pub nonce: u64,
    /// SHA256(prev_hash || merkle_root || BE64(nonce) || BE64(difficulty))
    pub hash: Hash,
    /// Distance from genesis; genesis is zero
    pub height: u64,
}

impl Block {
    /// Run the proof-of-work search and seal a new block.
    ///
    /// Fails with `Interrupted` when the stop flag is raised mid-search.
    pub fn seal(
        transactions: Vec<Transaction>,
        prev_hash: Hash,
        height: u64,
        stop: &AtomicBool,
    ) -> Result<Block, BlockError> {
        let mut block = Block {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
            transactions,
            prev_hash,
            nonce: 0,
            hash: Hash::zero(),
            height,
        };

        let pow = ProofOfWork::new(&block)?;
        let (nonce, hash) = pow.run(stop).ok_or(BlockError::Interrupted)?;
        block.nonce = nonce;
        block.hash = hash;

        Ok(block)
    }

    /// Seal the genesis block around a coinbase transaction
    pub fn genesis(coinbase: Transaction) -> Result<Block, BlockError> {
        Block::seal(vec![coinbase], Hash::zero(), 0, &AtomicBool::new(false))
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.prev_hash == Hash::zero()
    }

    /// Recompute the proof of work for the stored nonce: the sealed hash
    /// must match and beat the difficulty target.
    pub fn validate_pow(&self) -> Result<bool, BlockError> {
        let pow = ProofOfWork::new(self)?;
        let hash = pow.seal_hash(self.nonce);
        Ok(hash == self.hash && pow.meets_target(&hash))
    }
}
