//! ECDSA P-256 signatures
//!
//! Transactions are signed over a 32-byte digest. Signatures travel as the
//! fixed concatenation r || s (32 bytes each) and public keys as the
//! uncompressed coordinates X || Y (32 bytes each), so both buffers split
//! at exactly half their length.

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::generic_array::GenericArray;
use p256::EncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Hash;

/// Key and signature errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("signing failed")]
    SigningFailed,
}

/// P-256 private key
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateKey(#[serde(with = "key_serde")] SigningKey);

mod key_serde {
    use p256::ecdsa::SigningKey;
    use p256::elliptic_curve::generic_array::GenericArray;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(key: &SigningKey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&key.to_bytes())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SigningKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::custom("invalid private key length"));
        }
        SigningKey::from_bytes(GenericArray::from_slice(&bytes))
            .map_err(|_| serde::de::Error::custom("invalid private key scalar"))
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    /// Create from 32 bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        SigningKey::from_bytes(GenericArray::from_slice(bytes))
            .map(PrivateKey)
            .map_err(|_| KeyError::InvalidPrivateKey)
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    /// The 64-byte X || Y encoding of the corresponding public key
    pub fn public_key(&self) -> Vec<u8> {
        let point = self.0.verifying_key().to_encoded_point(false);
        // drop the 0x04 uncompressed-point tag
        point.as_bytes()[1..].to_vec()
    }

    /// Sign a precomputed digest, returning the 64-byte r || s buffer
    pub fn sign_digest(&self, digest: &Hash) -> Result<Vec<u8>, KeyError> {
        let signature: Signature = self
            .0
            .sign_prehash(&digest.0)
            .map_err(|_| KeyError::SigningFailed)?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// Verify an r || s signature over `digest` against an X || Y public key.
///
/// Malformed buffers fail verification rather than erroring: a peer can put
/// arbitrary bytes in both fields.
pub fn verify_digest(pub_key: &[u8], digest: &Hash, signature: &[u8]) -> bool {
    if pub_key.len() != 64 || signature.len() != 64 {
        return false;
    }

    let point = EncodedPoint::from_untagged_bytes(GenericArray::from_slice(pub_key));
    let verifying_key = match VerifyingKey::from_encoded_point(&point) {
        Ok(key) => key,
        Err(_) => return false,
    };

    let signature = match Signature::from_slice(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    verifying_key.verify_prehash(&digest.0, &signature).is_ok()
}
