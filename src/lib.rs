//! Pebble (PBL) Blockchain Core Library
//!
//! A pedagogical UTXO cryptocurrency: proof-of-work blocks over a sled
//! store, ECDSA P-256 signed transfers, a derived unspent-output index,
//! and a command-tagged TCP gossip protocol.
//!
//! PBL is the short form used in addresses and log output.

pub mod consensus;
pub mod crypto;
pub mod p2p;
pub mod storage;
pub mod validation;
pub mod wallet;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Proof-of-work difficulty: accepted hashes are below `1 << (256 - DIFFICULTY)`
    pub const DIFFICULTY: u32 = 12;

    /// Reward paid by every coinbase transaction (in tokens)
    pub const MINING_REWARD: u64 = 20;

    /// Mempool size at which a miner node seals a new block
    pub const MAX_TX_PER_BLOCK: usize = 2;

    /// Bootstrap node all others connect to first
    pub const CENTRAL_NODE: &str = "localhost:3001";

    /// Wire protocol version advertised in `version` messages
    pub const PROTOCOL_VERSION: u32 = 1;

    /// Fixed width of the ASCII command tag at the head of every frame
    pub const COMMAND_LENGTH: usize = 12;

    /// Version byte prepended to the public key hash in addresses
    pub const ADDRESS_VERSION: u8 = 0x00;

    /// Trailing checksum bytes in an address
    pub const CHECKSUM_LENGTH: usize = 4;

    /// Keys removed per batch when the UTXO index is rebuilt
    pub const UTXO_DELETE_BATCH: usize = 100_000;

    /// Data planted in the genesis coinbase input
    pub const GENESIS_DATA: &str = "First transaction from genesis";
}
