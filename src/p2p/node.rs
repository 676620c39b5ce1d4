//! Node orchestration
//!
//! One `Node` owns the chain store plus the process-wide protocol state:
//! the known-peer list, the mempool, and the block download queue. Each is
//! guarded by its own mutex; handlers never hold a lock across a send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::{
    AddrPayload, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Mempool,
    Message, MessageError, TxPayload, VersionPayload,
};
use crate::constants::{CENTRAL_NODE, MAX_TX_PER_BLOCK, PROTOCOL_VERSION};
use crate::consensus::Block;
use crate::crypto::Hash;
use crate::storage::{Blockchain, StorageError, UtxoSet};
use crate::validation::{Transaction, TxError};

/// A peer that connects but never finishes its frame is cut off here
const READ_DEADLINE: Duration = Duration::from_secs(10);

/// Node and protocol errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Store(#[from] StorageError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error("network i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer stalled mid-frame")]
    ReadTimeout,
}

/// A running node: chain store plus shared protocol state
pub struct Node {
    address: String,
    bootstrap: String,
    miner_address: Option<String>,
    chain: Blockchain,
    known_peers: Mutex<Vec<String>>,
    blocks_in_transit: Mutex<Vec<Vec<u8>>>,
    mempool: Mutex<Mempool>,
    stop: AtomicBool,
}

impl Node {
    /// Build a node around an opened chain. The known-peer list starts with
    /// the bootstrap address; a node whose own address equals it is the
    /// central node.
    pub fn new(
        address: String,
        miner_address: Option<String>,
        chain: Blockchain,
        bootstrap: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            known_peers: Mutex::new(vec![bootstrap.clone()]),
            address,
            bootstrap,
            miner_address,
            chain,
            blocks_in_transit: Mutex::new(Vec::new()),
            mempool: Mutex::new(Mempool::new()),
            stop: AtomicBool::new(false),
        })
    }

    /// Open the node-scoped chain and wire the node to the central bootstrap
    pub fn for_node_id(node_id: &str, miner_address: Option<String>) -> Result<Arc<Self>, StorageError> {
        let chain = Blockchain::resume(node_id)?;
        Ok(Self::new(
            format!("localhost:{node_id}"),
            miner_address,
            chain,
            CENTRAL_NODE.to_string(),
        ))
    }

    /// The chain this node serves
    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    /// Pending transaction count
    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().unwrap().len()
    }

    fn is_central(&self) -> bool {
        self.address == self.bootstrap
    }

    fn peers_snapshot(&self) -> Vec<String> {
        self.known_peers.lock().unwrap().clone()
    }

    /// Listen for peers, dispatch each connection to its own task, and shut
    /// the store down cleanly on ctrl-c. In-flight handlers are not drained.
    pub async fn serve(self: Arc<Self>) -> Result<(), NodeError> {
        let listener = TcpListener::bind(&self.address).await?;
        info!(address = %self.address, "node listening");

        if !self.is_central() {
            self.send_version(&self.bootstrap.clone()).await?;
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let node = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(err) = node.handle_connection(stream).await {
                                warn!(%peer, error = %err, "dropping connection");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received, closing store");
                    self.stop.store(true, Ordering::SeqCst);
                    self.chain.flush()?;
                    return Ok(());
                }
            }
        }
    }

    /// Read the connection's single frame and dispatch it
    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), NodeError> {
        let mut frame = Vec::new();
        tokio::time::timeout(READ_DEADLINE, stream.read_to_end(&mut frame))
            .await
            .map_err(|_| NodeError::ReadTimeout)??;
        drop(stream);

        let message = Message::from_bytes(&frame)?;
        debug!(command = message.command(), "received command");
        self.handle_message(message).await
    }

    /// Run one protocol message through its handler
    pub async fn handle_message(&self, message: Message) -> Result<(), NodeError> {
        match message {
            Message::Version(payload) => self.handle_version(payload).await,
            Message::Addr(payload) => self.handle_addr(payload).await,
            Message::GetBlocks(payload) => self.handle_get_blocks(payload).await,
            Message::Inv(payload) => self.handle_inv(payload).await,
            Message::GetData(payload) => self.handle_get_data(payload).await,
            Message::Block(payload) => self.handle_block(payload).await,
            Message::Tx(payload) => self.handle_tx(payload).await,
        }
    }

    /// Compare chain heights; the shorter side asks for blocks, the taller
    /// side re-advertises. Unknown senders join the peer list.
    async fn handle_version(&self, payload: VersionPayload) -> Result<(), NodeError> {
        let best_height = self.chain.best_height()?;

        if best_height < payload.best_height {
            self.send_get_blocks(&payload.addr_from).await?;
        } else if best_height > payload.best_height {
            self.send_version(&payload.addr_from).await?;
        }

        let mut peers = self.known_peers.lock().unwrap();
        if !peers.contains(&payload.addr_from) {
            peers.push(payload.addr_from);
        }
        Ok(())
    }

    /// Learn gossiped addresses, then ask everyone for their blocks
    async fn handle_addr(&self, payload: AddrPayload) -> Result<(), NodeError> {
        {
            let mut peers = self.known_peers.lock().unwrap();
            peers.extend(payload.addr_list);
            info!(count = peers.len(), "known peers updated");
        }
        self.request_blocks().await
    }

    /// Answer with every block hash we own, tip first
    async fn handle_get_blocks(&self, payload: GetBlocksPayload) -> Result<(), NodeError> {
        let items = self
            .chain
            .get_block_hashes()?
            .into_iter()
            .map(|hash| hash.0.to_vec())
            .collect();
        self.send_inv(&payload.addr_from, InvKind::Block, items).await
    }

    /// Queue advertised blocks for download one at a time; fetch advertised
    /// transactions we do not hold yet.
    async fn handle_inv(&self, payload: InvPayload) -> Result<(), NodeError> {
        debug!(count = payload.items.len(), kind = ?payload.kind, "received inventory");

        match payload.kind {
            InvKind::Block => {
                let first = {
                    let mut transit = self.blocks_in_transit.lock().unwrap();
                    *transit = payload.items;
                    if transit.is_empty() {
                        return Ok(());
                    }
                    transit.remove(0)
                };
                self.send_get_data(&payload.addr_from, InvKind::Block, first)
                    .await?;
            }
            InvKind::Tx => {
                let Some(id) = payload.items.into_iter().next() else {
                    return Ok(());
                };
                let pooled = self.mempool.lock().unwrap().contains(&hex::encode(&id));
                if !pooled {
                    self.send_get_data(&payload.addr_from, InvKind::Tx, id).await?;
                }
            }
        }
        Ok(())
    }

    /// Serve a requested block or mempool transaction; unknown block ids
    /// are dropped silently.
    async fn handle_get_data(&self, payload: GetDataPayload) -> Result<(), NodeError> {
        match payload.kind {
            InvKind::Block => {
                let Some(hash) = Hash::from_slice(&payload.id) else {
                    return Ok(());
                };
                match self.chain.get_block(&hash) {
                    Ok(block) => self.send_block(&payload.addr_from, &block).await,
                    Err(StorageError::BlockNotFound) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            InvKind::Tx => {
                let tx = self
                    .mempool
                    .lock()
                    .unwrap()
                    .get(&hex::encode(&payload.id))
                    .cloned();
                match tx {
                    Some(tx) => self.send_tx(&payload.addr_from, &tx).await,
                    None => Ok(()),
                }
            }
        }
    }

    /// Store a delivered block, then either pull the next queued block or,
    /// once the queue drains, rebuild the UTXO index.
    async fn handle_block(&self, payload: BlockPayload) -> Result<(), NodeError> {
        let block: Block = bincode::deserialize(&payload.block).map_err(MessageError::Malformed)?;
        info!(hash = %block.hash, height = block.height, "received a new block");

        self.chain.add_block(&block)?;

        let next = {
            let mut transit = self.blocks_in_transit.lock().unwrap();
            if transit.is_empty() {
                None
            } else {
                Some(transit.remove(0))
            }
        };

        match next {
            Some(hash) => {
                self.send_get_data(&payload.addr_from, InvKind::Block, hash)
                    .await
            }
            None => {
                UtxoSet::new(&self.chain).reindex()?;
                Ok(())
            }
        }
    }

    /// Pool a delivered transaction. The central node relays the id to
    /// every other peer; a miner node seals a block once the pool is full.
    async fn handle_tx(&self, payload: TxPayload) -> Result<(), NodeError> {
        let tx: Transaction =
            bincode::deserialize(&payload.transaction).map_err(MessageError::Malformed)?;
        let id = tx.id;

        let pool_len = {
            let mut pool = self.mempool.lock().unwrap();
            pool.insert(tx);
            pool.len()
        };
        debug!(id = %id, pool = pool_len, "transaction pooled");

        if self.is_central() {
            for peer in self.peers_snapshot() {
                if peer != self.address && peer != payload.addr_from {
                    self.send_inv(&peer, InvKind::Tx, vec![id.0.to_vec()]).await?;
                }
            }
        } else if self.miner_address.is_some() && pool_len >= MAX_TX_PER_BLOCK {
            self.mine_pending().await?;
        }
        Ok(())
    }

    /// Drain the mempool into blocks: verify the pooled transactions, drop
    /// the failures, append a coinbase for the miner, seal, reindex,
    /// broadcast, and repeat while transactions remain.
    pub async fn mine_pending(&self) -> Result<(), NodeError> {
        let Some(miner_address) = self.miner_address.clone() else {
            return Ok(());
        };

        loop {
            let candidates = self.mempool.lock().unwrap().transactions();

            let mut transactions = Vec::new();
            for tx in candidates {
                match self.chain.verify_transaction(&tx) {
                    Ok(true) => transactions.push(tx),
                    Ok(false) | Err(StorageError::TransactionNotFound) => {
                        warn!(id = %tx.id, "transaction failed verification, skipping")
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            if transactions.is_empty() {
                info!("all pooled transactions are invalid, nothing to mine");
                return Ok(());
            }

            transactions.push(Transaction::coinbase(&miner_address, Vec::new())?);

            let block = self.chain.mine_block(transactions.clone(), &self.stop)?;
            info!(hash = %block.hash, height = block.height, "new block mined");

            UtxoSet::new(&self.chain).reindex()?;

            {
                let mut pool = self.mempool.lock().unwrap();
                for tx in &transactions {
                    pool.remove(&tx.id.to_hex());
                }
            }

            for peer in self.peers_snapshot() {
                if peer != self.address {
                    self.send_inv(&peer, InvKind::Block, vec![block.hash.0.to_vec()])
                        .await?;
                }
            }

            if self.mempool.lock().unwrap().is_empty() {
                return Ok(());
            }
        }
    }

    /// Ask every known peer for its block hashes
    async fn request_blocks(&self) -> Result<(), NodeError> {
        for peer in self.peers_snapshot() {
            self.send_get_blocks(&peer).await?;
        }
        Ok(())
    }

    async fn send_version(&self, addr: &str) -> Result<(), NodeError> {
        let message = Message::Version(VersionPayload {
            version: PROTOCOL_VERSION,
            best_height: self.chain.best_height()?,
            addr_from: self.address.clone(),
        });
        self.send_data(addr, message.to_bytes()).await
    }

    async fn send_get_blocks(&self, addr: &str) -> Result<(), NodeError> {
        let message = Message::GetBlocks(GetBlocksPayload {
            addr_from: self.address.clone(),
        });
        self.send_data(addr, message.to_bytes()).await
    }

    async fn send_inv(&self, addr: &str, kind: InvKind, items: Vec<Vec<u8>>) -> Result<(), NodeError> {
        let message = Message::Inv(InvPayload {
            addr_from: self.address.clone(),
            kind,
            items,
        });
        self.send_data(addr, message.to_bytes()).await
    }

    async fn send_get_data(&self, addr: &str, kind: InvKind, id: Vec<u8>) -> Result<(), NodeError> {
        let message = Message::GetData(GetDataPayload {
            addr_from: self.address.clone(),
            kind,
            id,
        });
        self.send_data(addr, message.to_bytes()).await
    }

    async fn send_block(&self, addr: &str, block: &Block) -> Result<(), NodeError> {
        let message = Message::Block(BlockPayload {
            addr_from: self.address.clone(),
            block: bincode::serialize(block).unwrap(),
        });
        self.send_data(addr, message.to_bytes()).await
    }

    async fn send_tx(&self, addr: &str, tx: &Transaction) -> Result<(), NodeError> {
        let message = Message::Tx(TxPayload {
            addr_from: self.address.clone(),
            transaction: bincode::serialize(tx).unwrap(),
        });
        self.send_data(addr, message.to_bytes()).await
    }

    /// Ship one frame to a peer. A peer that cannot be dialed is dropped
    /// from the known-peer list and the failure swallowed; no retry.
    async fn send_data(&self, addr: &str, data: Vec<u8>) -> Result<(), NodeError> {
        let mut stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(_) => {
                warn!(%addr, "peer is not available, dropping from known peers");
                self.known_peers.lock().unwrap().retain(|peer| peer != addr);
                return Ok(());
            }
        };

        stream.write_all(&data).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// One-shot client send used by the CLI: deliver a signed transaction to a
/// node. Unlike peer gossip, a failed dial here is a hard error.
pub async fn submit_transaction(addr: &str, tx: &Transaction) -> Result<(), NodeError> {
    let message = Message::Tx(TxPayload {
        addr_from: String::new(),
        transaction: bincode::serialize(tx).unwrap(),
    });

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&message.to_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
