//! Live two-node protocol tests over loopback TCP

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tempfile::TempDir;

use pebble_core::p2p::{submit_transaction, Node};
use pebble_core::storage::{Blockchain, UtxoSet};
use pebble_core::validation::Transaction;
use pebble_core::wallet::Wallet;

fn free_port() -> u16 {
    // bind to an ephemeral port and recycle it immediately
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn copy_dir(src: &Path, dst: &Path) {
    fs::create_dir_all(dst).unwrap();
    for entry in fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Two nodes that share a genesis: the first mines a few blocks, the second
/// connects with an out-of-date store and must download the difference.
#[tokio::test(flavor = "multi_thread")]
async fn test_end_to_end_sync() {
    let dir = TempDir::new().unwrap();
    let path1 = dir.path().join("node1");
    let path2 = dir.path().join("node2");

    let wallet = Wallet::generate();

    // initialize node 1, then clone its genesis-only store for node 2
    {
        let chain = Blockchain::init_at(&wallet.address(), &path1).unwrap();
        chain.flush().unwrap();
    }
    copy_dir(&path1, &path2);

    // node 1 advances three blocks on its own
    let chain1 = Blockchain::resume_at(&path1).unwrap();
    for _ in 0..3 {
        let coinbase = Transaction::coinbase(&wallet.address(), Vec::new()).unwrap();
        chain1
            .mine_block(vec![coinbase], &AtomicBool::new(false))
            .unwrap();
    }
    let chain2 = Blockchain::resume_at(&path2).unwrap();
    assert_eq!(chain1.best_height().unwrap(), 3);
    assert_eq!(chain2.best_height().unwrap(), 0);

    let addr1 = format!("127.0.0.1:{}", free_port());
    let addr2 = format!("127.0.0.1:{}", free_port());

    // node 1 is the central node; node 2 bootstraps from it
    let node1 = Node::new(addr1.clone(), None, chain1, addr1.clone());
    let node2 = Node::new(addr2.clone(), None, chain2, addr1.clone());

    let serve1 = tokio::spawn(node1.clone().serve());
    tokio::time::sleep(Duration::from_millis(200)).await;
    // node 2 announces its version on startup, which triggers the download
    let serve2 = tokio::spawn(node2.clone().serve());

    let mut synced = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if node2.chain().best_height().unwrap() == 3 {
            synced = true;
            break;
        }
    }
    assert!(synced, "node 2 never caught up to height 3");

    let hashes1 = node1.chain().get_block_hashes().unwrap();
    let hashes2 = node2.chain().get_block_hashes().unwrap();
    assert_eq!(hashes1, hashes2);

    serve1.abort();
    serve2.abort();
}

/// The CLI-style one-shot send lands in a running node's mempool
#[tokio::test(flavor = "multi_thread")]
async fn test_submit_transaction_reaches_mempool() {
    let dir = TempDir::new().unwrap();
    let wallet = Wallet::generate();

    let chain = Blockchain::init_at(&wallet.address(), dir.path()).unwrap();
    UtxoSet::new(&chain).reindex().unwrap();

    let recipient = Wallet::generate();
    let tx = {
        let utxo = UtxoSet::new(&chain);
        Transaction::transfer(&wallet, &recipient.address(), 5, &utxo).unwrap()
    };

    let addr = format!("127.0.0.1:{}", free_port());
    let node = Node::new(addr.clone(), None, chain, addr.clone());
    let serve = tokio::spawn(node.clone().serve());
    tokio::time::sleep(Duration::from_millis(200)).await;

    submit_transaction(&addr, &tx).await.unwrap();

    let mut pooled = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if node.mempool_len() == 1 {
            pooled = true;
            break;
        }
    }
    assert!(pooled, "transaction never reached the mempool");

    serve.abort();
}
