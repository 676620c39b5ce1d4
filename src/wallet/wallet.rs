//! Wallet keypair
//!
//! Wallets do not affect consensus; the core only consumes the keypair and
//! the address encoding defined here.

use serde::{Deserialize, Serialize};

use super::{checksum, public_key_hash};
use crate::constants::ADDRESS_VERSION;
use crate::crypto::PrivateKey;

/// An ECDSA P-256 keypair with its base58check address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    private_key: PrivateKey,
    /// 64-byte X || Y public key
    pub public_key: Vec<u8>,
}

impl Wallet {
    /// Generate a fresh keypair
    pub fn generate() -> Self {
        let private_key = PrivateKey::generate();
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    /// The signing key
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// base58(version || pub_key_hash || checksum)
    pub fn address(&self) -> String {
        let mut payload = vec![ADDRESS_VERSION];
        payload.extend_from_slice(&public_key_hash(&self.public_key));
        payload.extend_from_slice(&checksum(&payload));

        bs58::encode(payload).into_string()
    }
}
