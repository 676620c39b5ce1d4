//! Wallet file store
//!
//! A flat address -> wallet map persisted beside the node's database so the
//! chain store and key material never share files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Wallet, WalletError};

/// Per-node wallet file
pub fn wallet_file(node_id: &str) -> PathBuf {
    PathBuf::from(format!("./tmp/wallets_{node_id}.data"))
}

/// All wallets known to one node
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
}

impl Wallets {
    /// Load the node's wallet file, or start empty when it does not exist
    pub fn load_or_create(node_id: &str) -> Result<Self, WalletError> {
        Self::load_or_create_at(wallet_file(node_id))
    }

    /// `load_or_create` against an explicit file path
    pub fn load_or_create_at<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Generate a new wallet; returns its address
    pub fn add_wallet(&mut self) -> String {
        let wallet = Wallet::generate();
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        address
    }

    /// Look up a wallet by address
    pub fn get_wallet(&self, address: &str) -> Result<&Wallet, WalletError> {
        self.wallets
            .get(address)
            .ok_or_else(|| WalletError::UnknownAddress(address.to_string()))
    }

    /// Every known address
    pub fn addresses(&self) -> Vec<&str> {
        self.wallets.keys().map(String::as_str).collect()
    }

    /// Persist to the node's wallet file
    pub fn save(&self, node_id: &str) -> Result<(), WalletError> {
        self.save_at(wallet_file(node_id))
    }

    /// `save` against an explicit file path
    pub fn save_at<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bincode::serialize(self)?)?;
        Ok(())
    }
}
