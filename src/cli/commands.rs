use crate::config::Config;
use crate::core::{Amount, Chain, Transaction};
use crate::crypto::merkle::verify_proof;
use crate::mining::Miner;
use crate::network::PeerHub;
use crate::storage::Store;
use crate::wallet;
use crate::{EmberError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

#[derive(Parser)]
#[command(name = "emberd")]
#[command(about = "Emberchain node - an account-based proof-of-work blockchain with user-issued tokens")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Data directory")]
    pub data_dir: Option<String>,

    #[arg(long, help = "Peer listen port")]
    pub port: Option<u16>,

    #[arg(long, help = "Comma-separated peer list (ws://host:port)")]
    pub peers: Option<String>,

    #[arg(long, help = "Enable debug logging")]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the node: peer listener, sync, and the mining timers
    Start {
        #[arg(long, help = "Address credited with mining rewards")]
        mining_address: Option<String>,
    },

    /// Wallet management
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Native and token balances of an address
    Balance { address: String },

    /// Sign a transfer with a local wallet and admit it to the mempool
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long, help = "Token id for a token transfer; omit for native")]
        token: Option<u64>,
    },

    /// Issue a new token credited to an address
    CreateToken {
        #[arg(long)]
        to: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        supply: String,
    },

    /// Chain information commands
    #[command(subcommand)]
    Chain(ChainCommands),

    /// Look up a mined transaction and check its inclusion proof
    Tx { hash: String },

    /// Follow an address's origin-transaction chain back through history
    Trace { address: String },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Generate a keypair and write it to the wallet directory
    Create,
    /// Print one wallet's address and public key
    Show { address: String },
    /// List wallet addresses
    List,
}

#[derive(Subcommand)]
pub enum ChainCommands {
    /// Height, tip and cumulative difficulty
    Info,
    /// Re-validate the whole local chain
    Validate,
}

pub async fn run_cli(mut config: Config) -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .try_init();

    if let Some(data_dir) = cli.data_dir {
        config.data_dir = PathBuf::from(data_dir);
    }
    if let Some(port) = cli.port {
        config.peer_port = port;
    }
    if let Some(peers) = cli.peers {
        config.peers = peers
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }

    match cli.command {
        Commands::Start { mining_address } => {
            if let Some(address) = mining_address {
                config.miner_address = address;
            }
            start_node(config).await
        }

        Commands::Wallet(command) => run_wallet_command(&config, command),

        Commands::Balance { address } => {
            let (_store, chain) = open_chain(&config)?;
            let report = chain.get_balance_of_address(&address)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        Commands::Send {
            from,
            to,
            amount,
            token,
        } => send_transfer(&config, from, to, amount, token),

        Commands::CreateToken {
            to,
            name,
            symbol,
            supply,
        } => create_token(&config, to, name, symbol, supply),

        Commands::Chain(command) => run_chain_command(&config, command),

        Commands::Tx { hash } => show_transaction(&config, hash),

        Commands::Trace { address } => trace_address(&config, address),
    }
}

fn open_store(config: &Config) -> Result<Arc<Store>> {
    Ok(Arc::new(Store::open(config.store_path())?))
}

/// Load the persisted chain for a one-shot command. Passing
/// `expect_peers = true` keeps a side command from minting genesis into an
/// empty store.
fn open_chain(config: &Config) -> Result<(Arc<Store>, Chain)> {
    let store = open_store(config)?;
    let chain = Chain::init(config.chain_config(), store.clone(), true)?;
    Ok((store, chain))
}

async fn start_node(config: Config) -> Result<()> {
    log::info!("Starting emberd with data dir {:?}", config.data_dir);

    let store = open_store(&config)?;
    let expect_peers = !config.peers.is_empty();
    let chain = Chain::init(config.chain_config(), store, expect_peers)?;
    let chain = Arc::new(RwLock::new(chain));

    let hub = PeerHub::new(chain.clone(), config.heartbeat_secs);
    hub.spawn_event_pump();
    hub.spawn_heartbeat();
    hub.listen(config.peer_port).await?;
    for peer in &config.peers {
        hub.connect(peer).await;
    }

    let miner = Arc::new(Miner::new(
        chain.clone(),
        config.miner_address.clone(),
        config.mining_interval_secs,
        config.pending_poll_secs,
    ));
    Arc::clone(&miner).spawn();

    log::info!(
        "Node up: height {}, mining to {}",
        chain.read().unwrap().len(),
        config.miner_address
    );

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    Ok(())
}

fn run_wallet_command(config: &Config, command: WalletCommands) -> Result<()> {
    match command {
        WalletCommands::Create => {
            let created = wallet::create_wallet(&config.wallet_dir())?;
            println!("Address:    {}", created.address);
            println!("Public key: {}", created.public_key);
            Ok(())
        }
        WalletCommands::Show { address } => {
            let loaded = wallet::load_wallet(&config.wallet_dir(), &address)?;
            println!("Address:    {}", loaded.address);
            println!("Public key: {}", loaded.public_key);
            Ok(())
        }
        WalletCommands::List => {
            for address in wallet::list_wallets(&config.wallet_dir())? {
                println!("{}", address);
            }
            Ok(())
        }
    }
}

fn send_transfer(
    config: &Config,
    from: String,
    to: String,
    amount: String,
    token: Option<u64>,
) -> Result<()> {
    let amount: Amount = amount.parse()?;
    let sender = wallet::load_wallet(&config.wallet_dir(), &from)?;
    let (store, mut chain) = open_chain(config)?;

    // Funds check before admission; the chain itself only enforces this at
    // block save.
    let report = chain.get_balance_of_address(&from)?;
    let available = match token {
        None => report.native,
        Some(token_id) => report
            .tokens
            .get(&token_id)
            .map(|t| t.balance)
            .unwrap_or(Amount::ZERO),
    };
    if available < amount {
        return Err(EmberError::InsufficientFunds {
            required: amount.to_string(),
            available: available.to_string(),
        });
    }

    let origin = store
        .latest_transaction_for_address(&from)?
        .map(|tx| tx.hash);
    let mut tx = Transaction::new_transfer(
        from,
        to,
        amount,
        token,
        origin,
        chrono::Utc::now().timestamp_millis(),
    );
    tx.sign(&sender.private_key()?)?;

    chain.add_pending_transaction(tx.clone(), None)?;
    println!("Submitted transaction {}", tx.hash);
    Ok(())
}

fn create_token(
    config: &Config,
    to: String,
    name: String,
    symbol: String,
    supply: String,
) -> Result<()> {
    let supply: Amount = supply.parse()?;
    let (store, mut chain) = open_chain(config)?;

    if store.token_id_for_symbol(&symbol)?.is_some() {
        return Err(EmberError::DuplicateTokenSymbol(symbol));
    }

    let token_id = store.next_token_id()?;
    let tx = Transaction::new_token_creation(
        to,
        supply,
        token_id,
        name,
        symbol,
        supply,
        chrono::Utc::now().timestamp_millis(),
    );

    chain.add_pending_transaction(tx.clone(), None)?;
    println!("Submitted token creation {} (token id {})", tx.hash, token_id);
    Ok(())
}

fn run_chain_command(config: &Config, command: ChainCommands) -> Result<()> {
    let (_store, chain) = open_chain(config)?;
    match command {
        ChainCommands::Info => {
            println!("Height:                {}", chain.len());
            println!(
                "Tip:                   {}",
                chain.last_block().map(|b| b.hash.as_str()).unwrap_or("-")
            );
            println!(
                "Cumulative difficulty: {}",
                Chain::cumulative_difficulty(chain.blocks())
            );
            println!("Pending transactions:  {}", chain.pending().len());
            Ok(())
        }
        ChainCommands::Validate => {
            if chain.is_chain_valid() {
                println!("Chain of {} blocks is valid", chain.len());
                Ok(())
            } else {
                Err(EmberError::Chain("Local chain failed validation".to_string()))
            }
        }
    }
}

fn show_transaction(config: &Config, hash: String) -> Result<()> {
    let (store, _chain) = open_chain(config)?;
    let tx = store
        .transaction_by_hash(&hash)?
        .ok_or_else(|| EmberError::Transaction(format!("Transaction {} not found", hash)))?;

    println!("{}", serde_json::to_string_pretty(&tx)?);

    if let Some(block_hash) = &tx.block_hash {
        if let Some(block) = store.block_by_hash(block_hash)? {
            match store.proof_path(block_hash, &tx.hash)? {
                Some(proof) => {
                    let ok = verify_proof(&tx.hash, &proof, &block.merkle_root);
                    println!(
                        "Inclusion proof: {} steps, {}",
                        proof.len(),
                        if ok { "valid" } else { "INVALID" }
                    );
                }
                None => println!("Inclusion proof: not found"),
            }
        }
    }
    Ok(())
}

fn trace_address(config: &Config, address: String) -> Result<()> {
    let (store, _chain) = open_chain(config)?;
    let mut current = store.latest_transaction_for_address(&address)?;

    if current.is_none() {
        println!("No outgoing transactions for {}", address);
        return Ok(());
    }

    let mut hop = 0;
    while let Some(tx) = current {
        println!(
            "#{:<3} {}  {} -> {}  {}",
            hop,
            tx.hash,
            tx.from_address.as_deref().unwrap_or("(reward)"),
            tx.to_address,
            tx.amount
        );
        current = match &tx.origin_transaction_hash {
            Some(origin) => store.transaction_by_hash(origin)?,
            None => None,
        };
        hop += 1;
    }
    Ok(())
}
