//! Memory pool
//!
//! Unconfirmed transactions keyed by hex id. Entries are added by the `tx`
//! handler, removed when a mined block includes them, and never evicted
//! otherwise. Duplicates overwrite. Nothing is persisted.

use std::collections::HashMap;

use crate::validation::Transaction;

#[derive(Debug, Default)]
pub struct Mempool {
    txs: HashMap<String, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction, keyed by the hex encoding of its id
    pub fn insert(&mut self, tx: Transaction) {
        self.txs.insert(tx.id.to_hex(), tx);
    }

    pub fn get(&self, id_hex: &str) -> Option<&Transaction> {
        self.txs.get(id_hex)
    }

    pub fn contains(&self, id_hex: &str) -> bool {
        self.txs.contains_key(id_hex)
    }

    pub fn remove(&mut self, id_hex: &str) {
        self.txs.remove(id_hex);
    }

    /// Snapshot of every pending transaction
    pub fn transactions(&self) -> Vec<Transaction> {
        self.txs.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}
