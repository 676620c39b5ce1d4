//! Cryptography module - SHA-256/RIPEMD-160 hashing, P-256 ECDSA, merkle trees

mod ecdsa;
mod hash;
mod merkle;

pub use ecdsa::*;
pub use hash::*;
pub use merkle::*;
