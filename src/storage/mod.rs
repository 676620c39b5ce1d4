//! Storage module - sled-backed chain store and UTXO index

mod chain;
mod iter;
mod utxo;

pub use chain::*;
pub use iter::*;
pub use utxo::*;

use sled::transaction::TransactionError;
use thiserror::Error;

use crate::consensus::BlockError;
use crate::validation::TxError;

/// Chain store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blockchain already exists")]
    AlreadyExists,
    #[error("no existing blockchain found, must be initialized first")]
    NotInitialized,
    #[error("block not found")]
    BlockNotFound,
    #[error("transaction not found")]
    TransactionNotFound,
    #[error("invalid transaction")]
    InvalidTransaction,
    #[error("block failed proof-of-work validation")]
    InvalidBlock,
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error("store error: {0}")]
    Sled(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl From<TransactionError<StorageError>> for StorageError {
    fn from(err: TransactionError<StorageError>) -> Self {
        match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => StorageError::Sled(err),
        }
    }
}
