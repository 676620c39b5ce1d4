//! UTXO index
//!
//! A derived index over the chain store: one entry per transaction that
//! still has unspent outputs, keyed by transaction id in the `utxos` tree.
//! Spent outputs are removed one by one; an entry whose output list empties
//! is deleted.

use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use std::collections::HashMap;
use tracing::debug;

use super::{Blockchain, StorageError};
use crate::constants::UTXO_DELETE_BATCH;
use crate::consensus::Block;
use crate::crypto::Hash;
use crate::validation::{TxOutput, TxOutputs};

/// The unspent-output index. Borrows the chain whose store it lives in.
pub struct UtxoSet<'a> {
    chain: &'a Blockchain,
}

impl<'a> UtxoSet<'a> {
    pub fn new(chain: &'a Blockchain) -> Self {
        Self { chain }
    }

    /// The chain this index derives from
    pub fn chain(&self) -> &Blockchain {
        self.chain
    }

    /// Collect outputs locked with `pub_key_hash` in first-found order until
    /// their sum reaches `amount`. Returns the accumulated total and the
    /// selected output indices per transaction id.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<Hash, Vec<i32>>), StorageError> {
        let mut accumulated = 0u64;
        let mut unspent_outs: HashMap<Hash, Vec<i32>> = HashMap::new();

        for entry in self.chain.utxos_tree().iter() {
            let (key, value) = entry?;
            let tx_id = Hash::from_slice(&key).ok_or(StorageError::TransactionNotFound)?;
            let outs: TxOutputs = bincode::deserialize(&value)?;

            for (index, out) in &outs.outputs {
                if out.is_locked_with(pub_key_hash) && accumulated < amount {
                    accumulated += out.value;
                    unspent_outs.entry(tx_id).or_default().push(*index);
                }
            }
        }

        Ok((accumulated, unspent_outs))
    }

    /// Every unspent output locked with `pub_key_hash`
    pub fn find_unspent_outputs(
        &self,
        pub_key_hash: &[u8],
    ) -> Result<Vec<TxOutput>, StorageError> {
        let mut unspent = Vec::new();

        for entry in self.chain.utxos_tree().iter() {
            let (_, value) = entry?;
            let outs: TxOutputs = bincode::deserialize(&value)?;

            for (_, out) in outs.outputs {
                if out.is_locked_with(pub_key_hash) {
                    unspent.push(out);
                }
            }
        }

        Ok(unspent)
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> Result<usize, StorageError> {
        let mut count = 0;
        for entry in self.chain.utxos_tree().iter() {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Drop the whole index and recompute it from the chain
    pub fn reindex(&self) -> Result<(), StorageError> {
        self.delete_all()?;

        let utxo = self.chain.find_utxo()?;
        let tree = self.chain.utxos_tree();
        for (tx_id, outs) in utxo {
            tree.insert(&tx_id, bincode::serialize(&outs).unwrap())?;
        }
        self.chain.flush()?;
        debug!("utxo index rebuilt");

        Ok(())
    }

    /// Remove every index entry in bounded batches
    fn delete_all(&self) -> Result<(), StorageError> {
        let tree = self.chain.utxos_tree();

        loop {
            let mut batch = sled::Batch::default();
            let mut collected = 0usize;

            for key in tree.iter().keys() {
                batch.remove(key?);
                collected += 1;
                if collected == UTXO_DELETE_BATCH {
                    break;
                }
            }

            if collected == 0 {
                return Ok(());
            }
            tree.apply_batch(batch)?;
        }
    }

    /// Apply a freshly stored block to the index: drop each spent output
    /// from its transaction's entry (deleting entries that empty), then
    /// record all outputs of every transaction in the block.
    pub fn update(&self, block: &Block) -> Result<(), StorageError> {
        self.chain
            .utxos_tree()
            .transaction(
                |utxos| -> ConflictableTransactionResult<(), StorageError> {
                    for tx in &block.transactions {
                        if !tx.is_coinbase() {
                            for input in &tx.inputs {
                                let stored = utxos.get(&input.prev_tx.0[..])?.ok_or_else(|| {
                                    ConflictableTransactionError::Abort(
                                        StorageError::TransactionNotFound,
                                    )
                                })?;
                                let mut outs: TxOutputs = bincode::deserialize(&stored)
                                    .map_err(|err| {
                                        ConflictableTransactionError::Abort(StorageError::Codec(
                                            err,
                                        ))
                                    })?;

                                outs.outputs.retain(|(index, _)| *index != input.out);

                                if outs.outputs.is_empty() {
                                    utxos.remove(&input.prev_tx.0[..])?;
                                } else {
                                    utxos.insert(
                                        &input.prev_tx.0[..],
                                        bincode::serialize(&outs).unwrap(),
                                    )?;
                                }
                            }
                        }

                        let fresh = TxOutputs {
                            outputs: tx
                                .outputs
                                .iter()
                                .enumerate()
                                .map(|(index, out)| (index as i32, out.clone()))
                                .collect(),
                        };
                        utxos.insert(&tx.id.0[..], bincode::serialize(&fresh).unwrap())?;
                    }

                    Ok(())
                },
            )
            .map_err(StorageError::from)?;
        self.chain.flush()?;

        Ok(())
    }
}
