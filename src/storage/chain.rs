//! Sled-backed block and chain store
//!
//! Blocks live in the `blocks` tree keyed by hash; the `meta` tree holds
//! the `lh` pointer to the tip (the block of greatest known height); the
//! `utxos` tree belongs to the UTXO index.

use sled::transaction::ConflictableTransactionResult;
use sled::{Db, Transactional, Tree};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tracing::info;

use super::{ChainIter, StorageError};
use crate::constants::GENESIS_DATA;
use crate::consensus::Block;
use crate::crypto::{Hash, PrivateKey};
use crate::validation::{Transaction, TxError, TxOutputs};

const BLOCKS_TREE: &str = "blocks";
const UTXOS_TREE: &str = "utxos";
const META_TREE: &str = "meta";
const TIP_KEY: &[u8] = b"lh";

/// Per-node database directory
pub fn db_path(node_id: &str) -> String {
    format!("./tmp/blocks_{node_id}")
}

/// The chain store. Owns the sled handle; cloning trees is cheap and the
/// store is safe to share across tasks.
pub struct Blockchain {
    db: Db,
    blocks: Tree,
    utxos: Tree,
    meta: Tree,
}

impl Blockchain {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let utxos = db.open_tree(UTXOS_TREE)?;
        let meta = db.open_tree(META_TREE)?;

        Ok(Self {
            db,
            blocks,
            utxos,
            meta,
        })
    }

    /// Initialize a fresh chain: genesis coinbase to `address` at height 0.
    ///
    /// Fails with `AlreadyExists` when the store already holds a chain.
    pub fn init(address: &str, node_id: &str) -> Result<Self, StorageError> {
        Self::init_at(address, db_path(node_id))
    }

    /// `init` against an explicit database path
    pub fn init_at<P: AsRef<Path>>(address: &str, path: P) -> Result<Self, StorageError> {
        let chain = Self::open(path)?;
        if chain.meta.get(TIP_KEY)?.is_some() {
            return Err(StorageError::AlreadyExists);
        }

        let coinbase = Transaction::coinbase(address, GENESIS_DATA.as_bytes().to_vec())?;
        let genesis = Block::genesis(coinbase)?;
        chain.persist_tip(&genesis)?;
        info!(hash = %genesis.hash, "genesis created");

        Ok(chain)
    }

    /// Open an already-initialized chain.
    ///
    /// Fails with `NotInitialized` when no tip pointer exists.
    pub fn resume(node_id: &str) -> Result<Self, StorageError> {
        Self::resume_at(db_path(node_id))
    }

    /// `resume` against an explicit database path
    pub fn resume_at<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let chain = Self::open(path)?;
        if chain.meta.get(TIP_KEY)?.is_none() {
            return Err(StorageError::NotInitialized);
        }
        Ok(chain)
    }

    /// Hash of the current tip
    pub fn tip_hash(&self) -> Result<Hash, StorageError> {
        let raw = self.meta.get(TIP_KEY)?.ok_or(StorageError::NotInitialized)?;
        Hash::from_slice(&raw).ok_or(StorageError::BlockNotFound)
    }

    fn tip_block(&self) -> Result<Block, StorageError> {
        self.get_block(&self.tip_hash()?)
    }

    /// Height of the current tip
    pub fn best_height(&self) -> Result<u64, StorageError> {
        Ok(self.tip_block()?.height)
    }

    /// Fetch a block by hash
    pub fn get_block(&self, hash: &Hash) -> Result<Block, StorageError> {
        let raw = self.blocks.get(hash)?.ok_or(StorageError::BlockNotFound)?;
        Ok(bincode::deserialize(&raw)?)
    }

    /// Every block hash from the tip back to genesis
    pub fn get_block_hashes(&self) -> Result<Vec<Hash>, StorageError> {
        let mut hashes = Vec::new();
        for block in self.iter()? {
            hashes.push(block?.hash);
        }
        Ok(hashes)
    }

    /// Backward cursor starting at the tip
    pub fn iter(&self) -> Result<ChainIter<'_>, StorageError> {
        Ok(ChainIter::new(self, self.tip_hash()?))
    }

    /// Verify the given transactions, seal a block on top of the tip, and
    /// atomically advance the tip to it.
    pub fn mine_block(
        &self,
        transactions: Vec<Transaction>,
        stop: &AtomicBool,
    ) -> Result<Block, StorageError> {
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(StorageError::InvalidTransaction);
            }
        }

        let tip = self.tip_block()?;
        let block = Block::seal(transactions, tip.hash, tip.height + 1, stop)?;
        self.persist_tip(&block)?;

        Ok(block)
    }

    /// Store a peer-supplied block. Idempotent by hash; the tip moves only
    /// when the block's height beats the current tip. Proof of work is
    /// checked before anything is persisted; transactions are not (blocks
    /// arrive tip-first during sync, before their ancestors).
    pub fn add_block(&self, block: &Block) -> Result<(), StorageError> {
        if self.blocks.contains_key(&block.hash)? {
            return Ok(());
        }

        if !block.validate_pow()? {
            return Err(StorageError::InvalidBlock);
        }

        let tip = self.tip_block()?;
        if block.height > tip.height {
            self.persist_tip(block)?;
        } else {
            let encoded = bincode::serialize(block).unwrap();
            self.blocks.insert(&block.hash, encoded)?;
            self.db.flush()?;
        }

        Ok(())
    }

    /// Write a block and point `lh` at it in one store transaction
    fn persist_tip(&self, block: &Block) -> Result<(), StorageError> {
        let encoded = bincode::serialize(block).unwrap();

        (&self.blocks, &self.meta)
            .transaction(
                |(blocks, meta)| -> ConflictableTransactionResult<(), StorageError> {
                    blocks.insert(&block.hash.0[..], encoded.as_slice())?;
                    meta.insert(TIP_KEY, &block.hash.0[..])?;
                    Ok(())
                },
            )
            .map_err(StorageError::from)?;
        self.db.flush()?;

        Ok(())
    }

    /// Linear backward scan for a transaction by id
    pub fn find_transaction(&self, id: &Hash) -> Result<Transaction, StorageError> {
        for block in self.iter()? {
            let block = block?;
            for tx in block.transactions {
                if tx.id == *id {
                    return Ok(tx);
                }
            }
        }
        Err(StorageError::TransactionNotFound)
    }

    /// Every transaction referenced by `tx`'s inputs, keyed by id
    fn previous_transactions(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<Hash, Transaction>, StorageError> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            let prev = self.find_transaction(&input.prev_tx)?;
            prev_txs.insert(prev.id, prev);
        }
        Ok(prev_txs)
    }

    /// Sign a transaction against its referenced previous transactions
    pub fn sign_transaction(
        &self,
        tx: &mut Transaction,
        key: &PrivateKey,
    ) -> Result<(), StorageError> {
        let prev_txs = self.previous_transactions(tx)?;
        tx.sign(key, &prev_txs).map_err(StorageError::Tx)
    }

    /// Verify a transaction against its referenced previous transactions
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool, StorageError> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.previous_transactions(tx)?;
        match tx.verify(&prev_txs) {
            Ok(valid) => Ok(valid),
            Err(TxError::MissingPrevTransaction) => Err(StorageError::TransactionNotFound),
            Err(err) => Err(StorageError::Tx(err)),
        }
    }

    /// Recompute the full unspent-output map from the chain: walking
    /// backward from the tip, an output is unspent iff no later input
    /// referenced it.
    pub fn find_utxo(&self) -> Result<HashMap<Hash, TxOutputs>, StorageError> {
        let mut utxo: HashMap<Hash, TxOutputs> = HashMap::new();
        let mut spent: HashMap<Hash, Vec<i32>> = HashMap::new();

        for block in self.iter()? {
            let block = block?;
            for tx in &block.transactions {
                let spent_outs = spent.get(&tx.id);

                for (index, out) in tx.outputs.iter().enumerate() {
                    let index = index as i32;
                    if spent_outs.is_some_and(|outs| outs.contains(&index)) {
                        continue;
                    }
                    utxo.entry(tx.id)
                        .or_default()
                        .outputs
                        .push((index, out.clone()));
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.entry(input.prev_tx).or_default().push(input.out);
                    }
                }
            }
        }

        Ok(utxo)
    }

    /// The UTXO index's tree in the same store
    pub(crate) fn utxos_tree(&self) -> &Tree {
        &self.utxos
    }

    /// Flush all dirty trees to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use tempfile::TempDir;

    fn fresh_chain() -> (TempDir, Blockchain, Wallet) {
        let dir = TempDir::new().unwrap();
        let wallet = Wallet::generate();
        let chain = Blockchain::init_at(&wallet.address(), dir.path()).unwrap();
        (dir, chain, wallet)
    }

    #[test]
    fn test_init_creates_genesis() {
        let (_dir, chain, _wallet) = fresh_chain();

        assert_eq!(chain.best_height().unwrap(), 0);

        let genesis = chain.get_block(&chain.tip_hash().unwrap()).unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.transactions.len(), 1);
        assert!(genesis.transactions[0].is_coinbase());
    }

    #[test]
    fn test_init_twice_fails() {
        let (dir, chain, wallet) = fresh_chain();
        drop(chain);

        let result = Blockchain::init_at(&wallet.address(), dir.path());
        assert!(matches!(result, Err(StorageError::AlreadyExists)));
    }

    #[test]
    fn test_resume_requires_init() {
        let dir = TempDir::new().unwrap();
        let result = Blockchain::resume_at(dir.path());
        assert!(matches!(result, Err(StorageError::NotInitialized)));
    }

    #[test]
    fn test_resume_after_init() {
        let (dir, chain, _wallet) = fresh_chain();
        let tip = chain.tip_hash().unwrap();
        drop(chain);

        let chain = Blockchain::resume_at(dir.path()).unwrap();
        assert_eq!(chain.tip_hash().unwrap(), tip);
    }

    #[test]
    fn test_mine_block_advances_tip() {
        let (_dir, chain, wallet) = fresh_chain();

        let coinbase = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
        let block = chain
            .mine_block(vec![coinbase], &AtomicBool::new(false))
            .unwrap();

        assert_eq!(block.height, 1);
        assert_eq!(chain.best_height().unwrap(), 1);
        assert_eq!(chain.tip_hash().unwrap(), block.hash);
    }

    #[test]
    fn test_iterator_walks_back_to_genesis() {
        let (_dir, chain, wallet) = fresh_chain();

        for _ in 0..3 {
            let coinbase = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
            chain
                .mine_block(vec![coinbase], &AtomicBool::new(false))
                .unwrap();
        }

        let heights: Vec<u64> = chain
            .iter()
            .unwrap()
            .map(|block| block.unwrap().height)
            .collect();
        assert_eq!(heights, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_get_block_hashes_tip_first() {
        let (_dir, chain, wallet) = fresh_chain();

        let coinbase = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
        let block = chain
            .mine_block(vec![coinbase], &AtomicBool::new(false))
            .unwrap();

        let hashes = chain.get_block_hashes().unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], block.hash);
        assert_eq!(hashes[1], block.prev_hash);
    }

    #[test]
    fn test_find_transaction() {
        let (_dir, chain, _wallet) = fresh_chain();

        let genesis = chain.get_block(&chain.tip_hash().unwrap()).unwrap();
        let coinbase_id = genesis.transactions[0].id;

        let found = chain.find_transaction(&coinbase_id).unwrap();
        assert_eq!(found.id, coinbase_id);

        let missing = chain.find_transaction(&crate::crypto::sha256(b"nope"));
        assert!(matches!(missing, Err(StorageError::TransactionNotFound)));
    }

    #[test]
    fn test_add_block_idempotent_and_fork_aware() {
        let (_dir, chain, wallet) = fresh_chain();

        let coinbase = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
        let block = chain
            .mine_block(vec![coinbase], &AtomicBool::new(false))
            .unwrap();

        // same block again is a no-op
        chain.add_block(&block).unwrap();
        assert_eq!(chain.best_height().unwrap(), 1);

        // a sibling at the same height is stored but does not move the tip
        let rival_coinbase = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
        let rival = Block::seal(
            vec![rival_coinbase],
            block.prev_hash,
            1,
            &AtomicBool::new(false),
        )
        .unwrap();
        chain.add_block(&rival).unwrap();
        assert_eq!(chain.tip_hash().unwrap(), block.hash);
        assert!(chain.get_block(&rival.hash).is_ok());

        // a higher block moves the tip
        let next_coinbase = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
        let next = Block::seal(vec![next_coinbase], rival.hash, 2, &AtomicBool::new(false)).unwrap();
        chain.add_block(&next).unwrap();
        assert_eq!(chain.tip_hash().unwrap(), next.hash);
        assert_eq!(chain.best_height().unwrap(), 2);
    }

    #[test]
    fn test_add_block_rejects_bad_pow() {
        let (_dir, chain, wallet) = fresh_chain();

        let coinbase = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
        let mut block = Block::seal(
            vec![coinbase],
            chain.tip_hash().unwrap(),
            1,
            &AtomicBool::new(false),
        )
        .unwrap();
        block.nonce += 1;

        assert!(matches!(
            chain.add_block(&block),
            Err(StorageError::InvalidBlock)
        ));
        assert!(matches!(
            chain.get_block(&block.hash),
            Err(StorageError::BlockNotFound)
        ));
    }

    #[test]
    fn test_mine_block_rejects_invalid_transaction() {
        let (_dir, chain, wallet) = fresh_chain();

        let genesis = chain.get_block(&chain.tip_hash().unwrap()).unwrap();
        let coinbase_id = genesis.transactions[0].id;

        // unsigned spend of the genesis coinbase
        let mut bogus = Transaction {
            id: Hash::zero(),
            inputs: vec![crate::validation::TxInput {
                prev_tx: coinbase_id,
                out: 0,
                signature: Vec::new(),
                pub_key: wallet.public_key.clone(),
            }],
            outputs: vec![crate::validation::TxOutput {
                value: 20,
                pub_key_hash: vec![1u8; 20],
            }],
        };
        bogus.id = bogus.hash();

        let result = chain.mine_block(vec![bogus], &AtomicBool::new(false));
        assert!(matches!(result, Err(StorageError::InvalidTransaction)));
    }
}
