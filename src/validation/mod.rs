//! Transaction model - inputs, outputs, signing and verification

mod transaction;

pub use transaction::*;
