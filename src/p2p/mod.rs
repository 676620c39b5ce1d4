//! P2P networking module - wire messages, mempool, node orchestration

mod mempool;
mod message;
mod node;

pub use mempool::*;
pub use message::*;
pub use node::*;
