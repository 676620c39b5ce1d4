//! Wallet module - keys, base58check addresses, wallet file persistence

mod wallet;
mod wallets;

pub use wallet::*;
pub use wallets::*;

use thiserror::Error;

use crate::constants::{ADDRESS_VERSION, CHECKSUM_LENGTH};
use crate::crypto::{double_sha256, ripemd160_sha256};

/// Wallet and address errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid address")]
    InvalidAddress,
    #[error("unknown address: {0}")]
    UnknownAddress(String),
    #[error("wallet file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wallet codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// RIPEMD-160(SHA-256(pub_key)): the 20-byte hash outputs lock to
pub fn public_key_hash(pub_key: &[u8]) -> Vec<u8> {
    ripemd160_sha256(pub_key)
}

/// First `CHECKSUM_LENGTH` bytes of a double SHA-256
pub fn checksum(payload: &[u8]) -> Vec<u8> {
    double_sha256(payload).0[..CHECKSUM_LENGTH].to_vec()
}

/// Decode an address back to the public key hash it wraps: base58-decode,
/// strip the version byte and the trailing checksum.
pub fn address_to_pub_key_hash(address: &str) -> Result<Vec<u8>, WalletError> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| WalletError::InvalidAddress)?;
    if decoded.len() <= 1 + CHECKSUM_LENGTH {
        return Err(WalletError::InvalidAddress);
    }
    Ok(decoded[1..decoded.len() - CHECKSUM_LENGTH].to_vec())
}

/// Check an address: version || pub_key_hash || checksum must base58-decode
/// and the checksum must recompute.
pub fn validate_address(address: &str) -> bool {
    let decoded = match bs58::decode(address).into_vec() {
        Ok(decoded) => decoded,
        Err(_) => return false,
    };
    if decoded.len() <= 1 + CHECKSUM_LENGTH {
        return false;
    }

    let (payload, actual_checksum) = decoded.split_at(decoded.len() - CHECKSUM_LENGTH);

    payload[0] == ADDRESS_VERSION && checksum(payload) == actual_checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_address_is_valid() {
        let wallet = Wallet::generate();
        assert!(validate_address(&wallet.address()));
    }

    #[test]
    fn test_tampered_address_is_invalid() {
        let wallet = Wallet::generate();
        let mut address = wallet.address();

        // flip one character without leaving the base58 alphabet
        let replacement = if address.ends_with('2') { '3' } else { '2' };
        address.pop();
        address.push(replacement);

        assert!(!validate_address(&address));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(!validate_address(""));
        assert!(!validate_address("0OIl"));
        assert!(!validate_address("abc"));
    }

    #[test]
    fn test_address_roundtrips_pub_key_hash() {
        let wallet = Wallet::generate();
        let decoded = address_to_pub_key_hash(&wallet.address()).unwrap();

        assert_eq!(decoded.len(), 20);
        assert_eq!(decoded, public_key_hash(&wallet.public_key));
    }
}
