//! Proof-of-work engine
//!
//! A candidate hash is accepted when its 256-bit big-endian value is
//! strictly below `1 << (256 - DIFFICULTY)`. The nonce search is sequential
//! from zero; the first satisfying nonce wins.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::DIFFICULTY;
use crate::consensus::Block;
use crate::crypto::{merkle_root, sha256, Hash, MerkleError};

/// Proof-of-work context for one block: the fixed preimage prefix and the
/// difficulty target.
pub struct ProofOfWork {
    prefix: Vec<u8>,
    target: [u8; 32],
}

impl ProofOfWork {
    /// Build the context from a block's previous hash and transaction set
    pub fn new(block: &Block) -> Result<Self, MerkleError> {
        let leaves: Vec<Vec<u8>> = block
            .transactions
            .iter()
            .map(|tx| bincode::serialize(tx).unwrap())
            .collect();
        let root = merkle_root(&leaves)?;

        let mut prefix = Vec::with_capacity(64);
        prefix.extend_from_slice(&block.prev_hash.0);
        prefix.extend_from_slice(&root.0);

        Ok(Self {
            prefix,
            target: target_bytes(),
        })
    }

    /// The hash a given nonce seals the block with
    pub fn seal_hash(&self, nonce: u64) -> Hash {
        let mut data = self.prefix.clone();
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&u64::from(DIFFICULTY).to_be_bytes());
        sha256(&data)
    }

    /// Whether a hash beats the difficulty target
    pub fn meets_target(&self, hash: &Hash) -> bool {
        hash.0 < self.target
    }

    /// Search nonces upward from zero until one seals the block.
    ///
    /// Returns `None` only when the stop flag is raised; the search itself
    /// always succeeds within the nonce range.
    pub fn run(&self, stop: &AtomicBool) -> Option<(u64, Hash)> {
        for nonce in 0..i64::MAX as u64 {
            if stop.load(Ordering::SeqCst) {
                return None;
            }

            let hash = self.seal_hash(nonce);
            if self.meets_target(&hash) {
                return Some((nonce, hash));
            }
        }
        None
    }

    /// Recompute with a stored nonce and check the target inequality
    pub fn validate(&self, nonce: u64) -> bool {
        self.meets_target(&self.seal_hash(nonce))
    }
}

/// `1 << (256 - DIFFICULTY)` as a big-endian 256-bit integer.
///
/// Byte-wise lexicographic comparison of 32-byte buffers is identical to
/// big-integer comparison of their big-endian values.
fn target_bytes() -> [u8; 32] {
    let bit = (256 - DIFFICULTY) as usize;
    let mut target = [0u8; 32];
    target[(255 - bit) / 8] = 1 << (bit % 8);
    target
}
