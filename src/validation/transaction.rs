//! Transaction model
//!
//! UTXO transactions: inputs consume previous outputs, outputs lock value
//! to a public key hash. Every input is signed with ECDSA P-256 over a
//! per-input digest of a trimmed transaction image.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::constants::MINING_REWARD;
use crate::crypto::{sha256, verify_digest, Hash, KeyError, PrivateKey};
use crate::storage::{StorageError, UtxoSet};
use crate::wallet::{address_to_pub_key_hash, public_key_hash, Wallet, WalletError};

/// Transaction construction and signing errors
#[derive(Debug, Error)]
pub enum TxError {
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    #[error("referenced previous transaction does not exist")]
    MissingPrevTransaction,
    #[error("referenced previous output does not exist")]
    MissingPrevOutput,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Store(Box<StorageError>),
}

impl From<StorageError> for TxError {
    fn from(err: StorageError) -> Self {
        TxError::Store(Box::new(err))
    }
}

/// A reference to a previous output, plus the proof allowed to spend it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction holding the referenced output; zero for coinbase
    pub prev_tx: Hash,
    /// Index of the referenced output; -1 for coinbase
    pub out: i32,
    /// r || s, empty until signed
    pub signature: Vec<u8>,
    /// X || Y of the spender's key; arbitrary data bytes on a coinbase
    pub pub_key: Vec<u8>,
}

/// Value locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in tokens
    pub value: u64,
    /// RIPEMD-160(SHA-256(pub_key)) of the recipient
    pub pub_key_hash: Vec<u8>,
}

impl TxOutput {
    /// Create an output locked to an address
    pub fn new(value: u64, address: &str) -> Result<Self, WalletError> {
        Ok(Self {
            value,
            pub_key_hash: address_to_pub_key_hash(address)?,
        })
    }

    /// An output is locked with a key hash iff the two are byte-equal
    pub fn is_locked_with(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

/// The still-unspent outputs of one transaction, stored as a unit in the
/// UTXO index. Each entry keeps the output's index within its original
/// transaction so inputs keep resolving after partial spends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputs {
    pub outputs: Vec<(i32, TxOutput)>,
}

/// A value transfer: inputs, outputs, and the hash of both as its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a coinbase transaction paying the mining reward to `to`.
    ///
    /// The phantom input references nothing; its pub_key field carries
    /// `data`, padded with 24 random bytes when empty so every coinbase
    /// hashes uniquely.
    pub fn coinbase(to: &str, mut data: Vec<u8>) -> Result<Transaction, TxError> {
        if data.is_empty() {
            let mut random = [0u8; 24];
            rand::rngs::OsRng.fill_bytes(&mut random);
            data = random.to_vec();
        }

        let input = TxInput {
            prev_tx: Hash::zero(),
            out: -1,
            signature: Vec::new(),
            pub_key: data,
        };
        let output = TxOutput::new(MINING_REWARD, to)?;

        let mut tx = Transaction {
            id: Hash::zero(),
            inputs: vec![input],
            outputs: vec![output],
        };
        tx.id = tx.hash();
        Ok(tx)
    }

    /// Build and sign a transfer of `amount` tokens from `from`'s wallet to
    /// `to`, selecting unspent outputs through the UTXO index.
    pub fn transfer(
        from: &Wallet,
        to: &str,
        amount: u64,
        utxo: &UtxoSet<'_>,
    ) -> Result<Transaction, TxError> {
        let pub_key_hash = public_key_hash(&from.public_key);
        let (accumulated, spendable) = utxo.find_spendable_outputs(&pub_key_hash, amount)?;

        if accumulated < amount {
            return Err(TxError::InsufficientFunds {
                have: accumulated,
                need: amount,
            });
        }

        let mut inputs = Vec::new();
        for (prev_tx, outs) in spendable {
            for out in outs {
                inputs.push(TxInput {
                    prev_tx,
                    out,
                    signature: Vec::new(),
                    pub_key: from.public_key.clone(),
                });
            }
        }

        let mut outputs = vec![TxOutput::new(amount, to)?];
        if accumulated > amount {
            // change flows back to the sender
            outputs.push(TxOutput::new(accumulated - amount, &from.address())?);
        }

        let mut tx = Transaction {
            id: Hash::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        utxo.chain().sign_transaction(&mut tx, from.private_key())?;

        Ok(tx)
    }

    /// SHA-256 of the serialization of this transaction with its id zeroed
    pub fn hash(&self) -> Hash {
        let mut copy = self.clone();
        copy.id = Hash::zero();
        sha256(&bincode::serialize(&copy).unwrap())
    }

    /// Check whether this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_tx == Hash::zero()
            && self.inputs[0].out == -1
    }

    /// A copy whose inputs carry only the (prev_tx, out) references
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_tx: input.prev_tx,
                out: input.out,
                signature: Vec::new(),
                pub_key: Vec::new(),
            })
            .collect();

        Transaction {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Sign every input against the previous transactions it references.
    ///
    /// Each input gets its own digest: the trimmed copy with the referenced
    /// output's pub_key_hash planted in that input's pub_key field, then
    /// re-hashed with the field cleared again. Coinbase is a no-op.
    pub fn sign(
        &mut self,
        key: &PrivateKey,
        prev_txs: &HashMap<Hash, Transaction>,
    ) -> Result<(), TxError> {
        if self.is_coinbase() {
            return Ok(());
        }

        for input in &self.inputs {
            if !prev_txs.contains_key(&input.prev_tx) {
                return Err(TxError::MissingPrevTransaction);
            }
        }

        let mut copy = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let digest = Self::input_digest(&mut copy, index, prev_txs)?;
            self.inputs[index].signature = key.sign_digest(&digest)?;
        }

        Ok(())
    }

    /// Verify every input signature against the referenced previous outputs.
    ///
    /// Returns `Ok(false)` on the first mismatch; malformed signature or
    /// key buffers count as mismatches. Coinbase verifies unconditionally.
    pub fn verify(&self, prev_txs: &HashMap<Hash, Transaction>) -> Result<bool, TxError> {
        if self.is_coinbase() {
            return Ok(true);
        }

        for input in &self.inputs {
            if !prev_txs.contains_key(&input.prev_tx) {
                return Err(TxError::MissingPrevTransaction);
            }
        }

        let mut copy = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let digest = match Self::input_digest(&mut copy, index, prev_txs) {
                Ok(digest) => digest,
                // a non-coinbase input referencing a missing output can
                // never verify
                Err(TxError::MissingPrevOutput) => return Ok(false),
                Err(err) => return Err(err),
            };

            if !verify_digest(&input.pub_key, &digest, &input.signature) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// The per-input signing digest shared by `sign` and `verify`
    fn input_digest(
        copy: &mut Transaction,
        index: usize,
        prev_txs: &HashMap<Hash, Transaction>,
    ) -> Result<Hash, TxError> {
        let prev_tx = prev_txs
            .get(&copy.inputs[index].prev_tx)
            .ok_or(TxError::MissingPrevTransaction)?;
        let out = usize::try_from(copy.inputs[index].out)
            .ok()
            .and_then(|idx| prev_tx.outputs.get(idx))
            .ok_or(TxError::MissingPrevOutput)?;

        copy.inputs[index].signature.clear();
        copy.inputs[index].pub_key = out.pub_key_hash.clone();
        copy.id = copy.hash();
        copy.inputs[index].pub_key = Vec::new();

        Ok(copy.id)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {i}:")?;
            writeln!(f, "       TXID:      {}", input.prev_tx)?;
            writeln!(f, "       Out:       {}", input.out)?;
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.pub_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {i}:")?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", hex::encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_coinbase(pub_key_hash: Vec<u8>) -> Transaction {
        let mut tx = Transaction {
            id: Hash::zero(),
            inputs: vec![TxInput {
                prev_tx: Hash::zero(),
                out: -1,
                signature: Vec::new(),
                pub_key: b"tx test".to_vec(),
            }],
            outputs: vec![TxOutput {
                value: MINING_REWARD,
                pub_key_hash,
            }],
        };
        tx.id = tx.hash();
        tx
    }

    /// A signed single-input spend of `prev`'s first output
    fn signed_spend(prev: &Transaction, key: &PrivateKey) -> (Transaction, HashMap<Hash, Transaction>) {
        let mut tx = Transaction {
            id: Hash::zero(),
            inputs: vec![TxInput {
                prev_tx: prev.id,
                out: 0,
                signature: Vec::new(),
                pub_key: key.public_key(),
            }],
            outputs: vec![TxOutput {
                value: prev.outputs[0].value,
                pub_key_hash: vec![9u8; 20],
            }],
        };
        tx.id = tx.hash();

        let mut prev_txs = HashMap::new();
        prev_txs.insert(prev.id, prev.clone());
        tx.sign(key, &prev_txs).unwrap();

        (tx, prev_txs)
    }

    #[test]
    fn test_coinbase_detection() {
        let coinbase = manual_coinbase(vec![1u8; 20]);
        assert!(coinbase.is_coinbase());

        let regular = Transaction {
            id: Hash::zero(),
            inputs: vec![TxInput {
                prev_tx: sha256(b"prev"),
                out: 0,
                signature: Vec::new(),
                pub_key: Vec::new(),
            }],
            outputs: vec![],
        };
        assert!(!regular.is_coinbase());
    }

    #[test]
    fn test_hash_zeroes_id() {
        let mut tx = manual_coinbase(vec![1u8; 20]);
        let original = tx.hash();

        // the stored id does not feed back into the hash
        tx.id = sha256(b"something else");
        assert_eq!(tx.hash(), original);
    }

    #[test]
    fn test_trimmed_copy_idempotent() {
        let key = PrivateKey::generate();
        let coinbase = manual_coinbase(public_key_hash(&key.public_key()));
        let (tx, _) = signed_spend(&coinbase, &key);

        let trimmed = tx.trimmed_copy();
        assert!(trimmed.inputs.iter().all(|i| i.signature.is_empty() && i.pub_key.is_empty()));
        assert_eq!(trimmed.outputs, tx.outputs);
        assert_eq!(trimmed.trimmed_copy(), trimmed);
    }

    #[test]
    fn test_sign_then_verify() {
        let key = PrivateKey::generate();
        let coinbase = manual_coinbase(public_key_hash(&key.public_key()));
        let (tx, prev_txs) = signed_spend(&coinbase, &key);

        assert!(tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let key = PrivateKey::generate();
        let coinbase = manual_coinbase(public_key_hash(&key.public_key()));
        let (mut tx, prev_txs) = signed_spend(&coinbase, &key);

        // swap in a different spender's public key
        tx.inputs[0].pub_key = PrivateKey::generate().public_key();
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_verify_rejects_tampered_output() {
        let key = PrivateKey::generate();
        let coinbase = manual_coinbase(public_key_hash(&key.public_key()));
        let (mut tx, prev_txs) = signed_spend(&coinbase, &key);

        tx.outputs[0].value += 1;
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_verify_rejects_out_of_range_output() {
        let key = PrivateKey::generate();
        let coinbase = manual_coinbase(public_key_hash(&key.public_key()));
        let (mut tx, prev_txs) = signed_spend(&coinbase, &key);

        tx.inputs[0].out = 5;
        assert!(!tx.verify(&prev_txs).unwrap());
    }

    #[test]
    fn test_missing_prev_transaction_is_error() {
        let key = PrivateKey::generate();
        let coinbase = manual_coinbase(public_key_hash(&key.public_key()));
        let (tx, _) = signed_spend(&coinbase, &key);

        let result = tx.verify(&HashMap::new());
        assert!(matches!(result, Err(TxError::MissingPrevTransaction)));
    }

    #[test]
    fn test_coinbase_verifies_unconditionally() {
        let coinbase = manual_coinbase(vec![1u8; 20]);
        assert!(coinbase.verify(&HashMap::new()).unwrap());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let key = PrivateKey::generate();
        let coinbase = manual_coinbase(public_key_hash(&key.public_key()));
        let (tx, _) = signed_spend(&coinbase, &key);

        let bytes = bincode::serialize(&tx).unwrap();
        let recovered: Transaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(recovered, tx);
    }

    #[test]
    fn test_output_locking() {
        let out = TxOutput {
            value: 5,
            pub_key_hash: vec![3u8; 20],
        };
        assert!(out.is_locked_with(&[3u8; 20]));
        assert!(!out.is_locked_with(&[4u8; 20]));
    }
}
