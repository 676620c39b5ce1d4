//! Wire protocol messages
//!
//! Every TCP connection carries exactly one frame: a fixed-width 12-byte
//! ASCII command tag, right-padded with zero bytes, immediately followed by
//! the bincode serialization of that command's payload. Frames carry no
//! length prefix; the receiver reads to end of stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::COMMAND_LENGTH;

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("frame shorter than the command tag")]
    Truncated,
    #[error("command tag is not ascii")]
    BadCommandTag,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("malformed payload: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Whether an inventory item names a block or a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    Block,
    Tx,
}

/// Advertise the sender's chain height
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionPayload {
    pub version: u32,
    pub best_height: u64,
    pub addr_from: String,
}

/// Gossip peer addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddrPayload {
    pub addr_list: Vec<String>,
}

/// Ask a peer for all of its block hashes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

/// Advertise owned block hashes or transaction ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

/// Request one block or transaction by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

/// Deliver a serialized block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload {
    pub addr_from: String,
    pub block: Vec<u8>,
}

/// Deliver a serialized transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxPayload {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

/// The seven protocol commands as a tagged sum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Version(VersionPayload),
    Addr(AddrPayload),
    GetBlocks(GetBlocksPayload),
    Inv(InvPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
    Tx(TxPayload),
}

impl Message {
    /// The wire command tag for this message
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Addr(_) => "addr",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
        }
    }

    /// Encode a frame: zero-padded command tag plus bincode payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = vec![0u8; COMMAND_LENGTH];
        frame[..self.command().len()].copy_from_slice(self.command().as_bytes());

        let payload = match self {
            Message::Version(payload) => bincode::serialize(payload),
            Message::Addr(payload) => bincode::serialize(payload),
            Message::GetBlocks(payload) => bincode::serialize(payload),
            Message::Inv(payload) => bincode::serialize(payload),
            Message::GetData(payload) => bincode::serialize(payload),
            Message::Block(payload) => bincode::serialize(payload),
            Message::Tx(payload) => bincode::serialize(payload),
        }
        .unwrap();
        frame.extend_from_slice(&payload);

        frame
    }

    /// Decode a frame received from a peer
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() < COMMAND_LENGTH {
            return Err(MessageError::Truncated);
        }

        let tag_end = bytes[..COMMAND_LENGTH]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_LENGTH);
        let command = std::str::from_utf8(&bytes[..tag_end])
            .map_err(|_| MessageError::BadCommandTag)?;
        let payload = &bytes[COMMAND_LENGTH..];

        match command {
            "version" => Ok(Message::Version(bincode::deserialize(payload)?)),
            "addr" => Ok(Message::Addr(bincode::deserialize(payload)?)),
            "getblocks" => Ok(Message::GetBlocks(bincode::deserialize(payload)?)),
            "inv" => Ok(Message::Inv(bincode::deserialize(payload)?)),
            "getdata" => Ok(Message::GetData(bincode::deserialize(payload)?)),
            "block" => Ok(Message::Block(bincode::deserialize(payload)?)),
            "tx" => Ok(Message::Tx(bincode::deserialize(payload)?)),
            other => Err(MessageError::UnknownCommand(other.to_string())),
        }
    }
}
