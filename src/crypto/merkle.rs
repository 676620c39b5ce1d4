//! Merkle tree over serialized transactions
//!
//! The root commits a block's transaction set into its proof-of-work
//! preimage.

use thiserror::Error;

use super::{hash_pair, sha256, Hash};

/// Merkle tree errors
#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("merkle tree requires at least one leaf")]
    Empty,
}

/// Compute the merkle root of an ordered list of leaf byte strings.
///
/// Every leaf is SHA-256 hashed to form level zero; an odd level duplicates
/// its last node; adjacent pairs are concatenated and hashed until a single
/// root remains. An empty leaf set is an error - blocks always carry at
/// least the coinbase.
pub fn merkle_root(leaves: &[Vec<u8>]) -> Result<Hash, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::Empty);
    }

    let mut level: Vec<Hash> = leaves.iter().map(|leaf| sha256(leaf)).collect();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }

        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    Ok(level[0])
}
