//! Pebble (PBL) node CLI
//!
//! `NODE_ID` selects the node identity: its TCP port, its database
//! directory under ./tmp, and its wallet file.

use clap::{Parser, Subcommand};
use std::sync::atomic::AtomicBool;

use pebble_core::p2p::{submit_transaction, Node};
use pebble_core::constants::CENTRAL_NODE;
use pebble_core::storage::{Blockchain, UtxoSet};
use pebble_core::validation::Transaction;
use pebble_core::wallet::{address_to_pub_key_hash, validate_address, Wallets};

#[derive(Parser)]
#[command(name = "pebble", about = "Pebble (PBL) blockchain node", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a chain whose genesis reward goes to ADDRESS
    Createblockchain {
        #[arg(long)]
        address: String,
    },
    /// Generate a new wallet and print its address
    Createwallet,
    /// List the addresses in the node's wallet file
    Listaddresses,
    /// Print every block from the tip back to genesis
    Printchain,
    /// Rebuild the UTXO index from the chain
    Reindexutxo,
    /// Sum the unspent outputs locked to ADDRESS
    Getbalance {
        #[arg(long)]
        address: String,
    },
    /// Send AMOUNT from FROM to TO; --mine seals the block locally
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        mine: bool,
    },
    /// Run the node; --miner enables mining to the given address
    Startnode {
        #[arg(long)]
        miner: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let node_id = std::env::var("NODE_ID").map_err(|_| "NODE_ID env var is not set")?;
    let cli = Cli::parse();

    match cli.command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err("address is not valid".into());
            }
            let chain = Blockchain::init(&address, &node_id)?;
            UtxoSet::new(&chain).reindex()?;
            println!("Finished!");
        }

        Command::Createwallet => {
            let mut wallets = Wallets::load_or_create(&node_id)?;
            let address = wallets.add_wallet();
            wallets.save(&node_id)?;
            println!("New address is: {address}");
        }

        Command::Listaddresses => {
            let wallets = Wallets::load_or_create(&node_id)?;
            for address in wallets.addresses() {
                println!("{address}");
            }
        }

        Command::Printchain => {
            let chain = Blockchain::resume(&node_id)?;
            for block in chain.iter()? {
                let block = block?;
                println!("============ Block {} ============", block.hash);
                println!("Height:    {}", block.height);
                println!("Prev hash: {}", block.prev_hash);
                println!("PoW:       {}", block.validate_pow()?);
                for tx in &block.transactions {
                    println!("{tx}");
                }
                println!();
            }
        }

        Command::Reindexutxo => {
            let chain = Blockchain::resume(&node_id)?;
            let utxo = UtxoSet::new(&chain);
            utxo.reindex()?;
            println!(
                "Done! There are {} transactions in the UTXO set.",
                utxo.count_transactions()?
            );
        }

        Command::Getbalance { address } => {
            if !validate_address(&address) {
                return Err("address is not valid".into());
            }
            let chain = Blockchain::resume(&node_id)?;
            let utxo = UtxoSet::new(&chain);

            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let balance: u64 = utxo
                .find_unspent_outputs(&pub_key_hash)?
                .iter()
                .map(|out| out.value)
                .sum();
            println!("Balance of {address}: {balance}");
        }

        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            if !validate_address(&from) {
                return Err("sender address is not valid".into());
            }
            if !validate_address(&to) {
                return Err("recipient address is not valid".into());
            }

            let chain = Blockchain::resume(&node_id)?;
            let utxo = UtxoSet::new(&chain);

            let wallets = Wallets::load_or_create(&node_id)?;
            let wallet = wallets.get_wallet(&from)?;

            let tx = Transaction::transfer(wallet, &to, amount, &utxo)?;

            if mine {
                let coinbase = Transaction::coinbase(&from, Vec::new())?;
                let block = chain.mine_block(vec![coinbase, tx], &AtomicBool::new(false))?;
                utxo.update(&block)?;
            } else {
                submit_transaction(CENTRAL_NODE, &tx).await?;
            }
            println!("Success!");
        }

        Command::Startnode { miner } => {
            println!("Starting node {node_id}");
            if let Some(address) = &miner {
                if !validate_address(address) {
                    return Err("miner address is not valid".into());
                }
                println!("Mining is on. Address to receive rewards: {address}");
            }
            Node::for_node_id(&node_id, miner)?.serve().await?;
        }
    }

    Ok(())
}
