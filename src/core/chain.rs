use crate::core::{Amount, Block, Transaction};
use crate::crypto::keys::is_valid_address;
use crate::storage::Store;
use crate::{EmberError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Consensus-relevant configuration. Difficulty is static by design: a
/// retargeting policy would invalidate every existing block hash.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub difficulty: u32,
    pub mining_reward: Amount,
    pub genesis_supply: Amount,
    pub genesis_address: String,
    pub miner_address: String,
}

/// Emitted on local state changes so the peer layer can fan out. `origin`
/// names the peer a block or transaction arrived from, for gossip
/// exclusion; `None` marks locally originated work.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    TransactionAdmitted {
        transaction: Transaction,
        origin: Option<u64>,
    },
    BlockAppended {
        block: Block,
        origin: Option<u64>,
    },
}

/// Native and per-token balances of one address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceReport {
    pub native: Amount,
    pub tokens: BTreeMap<u64, TokenBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenBalance {
    pub symbol: String,
    pub balance: Amount,
}

/// The chain state machine: the in-memory block sequence, the mempool, and
/// the admit/mine/replace rules. One instance per process, created through
/// `Chain::init`; tests construct isolated instances over temp stores.
pub struct Chain {
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
    pending_hashes: HashSet<String>,
    store: Arc<Store>,
    config: ChainConfig,
    events: broadcast::Sender<ChainEvent>,
    replacing_chain: AtomicBool,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Chain {
    /// Bring up the chain: mint a genesis block on a fresh store, or load
    /// and validate what is persisted. With peers configured and an empty
    /// store, start empty and wait for the first valid full chain.
    pub fn init(config: ChainConfig, store: Arc<Store>, expect_peers: bool) -> Result<Self> {
        let (events, _) = broadcast::channel(256);
        let mut chain = Self {
            blocks: Vec::new(),
            pending: Vec::new(),
            pending_hashes: HashSet::new(),
            store,
            config,
            events,
            replacing_chain: AtomicBool::new(false),
        };

        let stored = chain.store.block_count()?;
        if stored == 0 {
            if expect_peers {
                log::info!("Empty store and peers configured; waiting for a full chain");
            } else {
                chain.mint_genesis()?;
            }
        } else {
            chain.load_from_store()?;
        }

        for tx in chain.store.pending_transactions()? {
            chain.pending_hashes.insert(tx.hash.clone());
            chain.pending.push(tx);
        }

        Ok(chain)
    }

    fn mint_genesis(&mut self) -> Result<()> {
        let timestamp = now_millis();
        let reward = Transaction::new_reward(
            self.config.genesis_address.clone(),
            self.config.genesis_supply,
            timestamp,
        );
        let mut genesis = Block::new(0, None, timestamp, vec![reward], self.config.difficulty);
        genesis.mine();

        self.store.save_block(&mut genesis)?;
        log::info!("Minted genesis block {}", genesis.hash);
        self.blocks.push(genesis);
        Ok(())
    }

    fn load_from_store(&mut self) -> Result<()> {
        let blocks = self.store.blocks_ordered()?;

        for (i, block) in blocks.iter().enumerate() {
            if block.index != i as u64 {
                return Err(EmberError::ChainInconsistent(format!(
                    "Block index gap at {}",
                    i
                )));
            }
            if i > 0 {
                let prior_hash = &blocks[i - 1].hash;
                if block.previous_hash.as_ref() != Some(prior_hash) {
                    return Err(EmberError::ChainInconsistent(format!(
                        "Block {} does not link to its predecessor",
                        block.index
                    )));
                }
            }
            if Block::calculate_merkle_root(&block.transactions) != block.merkle_root {
                return Err(EmberError::ChainInconsistent(format!(
                    "Merkle root mismatch at block {}",
                    block.index
                )));
            }
        }

        log::info!("Loaded {} blocks from store", blocks.len());
        self.blocks = blocks;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn contains_block(&self, hash: &str) -> bool {
        self.blocks.iter().any(|b| b.hash == hash)
    }

    /// Admit a transaction to the mempool. Invalid transactions are
    /// rejected outright; re-submitting an already-pending hash is a no-op.
    /// Returns whether the transaction was newly admitted.
    pub fn add_pending_transaction(
        &mut self,
        transaction: Transaction,
        origin: Option<u64>,
    ) -> Result<bool> {
        if transaction.amount.is_zero() {
            return Err(EmberError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }
        if !is_valid_address(&transaction.to_address) {
            return Err(EmberError::Transaction(format!(
                "Invalid recipient address: {}",
                transaction.to_address
            )));
        }
        if let Some(from) = &transaction.from_address {
            if !is_valid_address(from) {
                return Err(EmberError::Transaction(format!(
                    "Invalid sender address: {}",
                    from
                )));
            }
        }
        if transaction.compute_hash() != transaction.hash {
            return Err(EmberError::Transaction(
                "Transaction hash does not match its contents".to_string(),
            ));
        }
        if !transaction.is_valid() {
            return Err(EmberError::InvalidSignature);
        }

        if self.pending_hashes.contains(&transaction.hash) {
            log::debug!("Transaction {} already pending", transaction.hash);
            return Ok(false);
        }

        self.store.upsert_pending(&transaction)?;
        self.pending_hashes.insert(transaction.hash.clone());
        self.pending.push(transaction.clone());
        log::info!("Admitted transaction {} to mempool", transaction.hash);

        let _ = self.events.send(ChainEvent::TransactionAdmitted {
            transaction,
            origin,
        });
        Ok(true)
    }

    /// Assemble, mine and persist a block from the mempool. Returns `None`
    /// when there is nothing to mine. Callers serialize invocations through
    /// the mining lock; see `mining::Miner`.
    pub fn mine_pending_transactions(&mut self, reward_address: &str) -> Result<Option<Block>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let last = match self.blocks.last() {
            Some(block) => block.clone(),
            None => {
                log::debug!("No local chain yet; skipping mining");
                return Ok(None);
            }
        };

        // Races with incoming blocks can leave already-mined transactions
        // in the mempool; drop them here rather than double-spend.
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        let mut stale = Vec::new();
        for tx in &self.pending {
            if self.store.has_transaction(&tx.hash)? {
                stale.push(tx.hash.clone());
                continue;
            }
            if seen.insert(tx.hash.clone()) {
                candidates.push(tx.clone());
            }
        }
        for hash in &stale {
            self.forget_pending(hash)?;
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        let derived = Block::derive_origin_transaction_hash(&last.transactions);
        if derived != last.origin_transaction_hash {
            return Err(EmberError::ChainInconsistent(format!(
                "Origin transaction hash of block {} does not match its transactions",
                last.index
            )));
        }

        // Token creations go first so a creation and a transfer of the same
        // token can settle within one block.
        let timestamp = now_millis();
        let (mut transactions, regular): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|tx| tx.is_token_creation());
        transactions.extend(regular);
        transactions.push(Transaction::new_reward(
            reward_address.to_string(),
            self.config.mining_reward,
            timestamp,
        ));

        let mut block = Block::new(
            self.blocks.len() as u64,
            Some(last.hash.clone()),
            timestamp,
            transactions,
            self.config.difficulty,
        );
        block.mine();
        log::info!(
            "Mined block {} with {} transactions (nonce {})",
            block.index,
            block.transactions.len(),
            block.nonce
        );

        self.store.save_block(&mut block)?;
        self.blocks.push(block.clone());
        for tx in &block.transactions {
            self.forget_pending_memory(&tx.hash);
        }

        let _ = self.events.send(ChainEvent::BlockAppended {
            block: block.clone(),
            origin: None,
        });
        Ok(Some(block))
    }

    /// Accept an already-mined block from a peer.
    pub fn add_block(&mut self, mut block: Block, origin: Option<u64>) -> Result<()> {
        let last = self
            .blocks
            .last()
            .ok_or_else(|| EmberError::Block("No local chain to extend".to_string()))?;

        if block.previous_hash.as_deref() != Some(last.hash.as_str()) {
            return Err(EmberError::Block(format!(
                "Block {} does not extend the current tip",
                block.index
            )));
        }
        if !block.has_valid_transactions() {
            return Err(EmberError::Block(format!(
                "Block {} carries invalid transactions",
                block.index
            )));
        }
        if block.compute_hash() != block.hash {
            return Err(EmberError::Block(format!(
                "Block {} does not recompute to its hash",
                block.index
            )));
        }
        if !block.meets_difficulty() {
            return Err(EmberError::Block(format!(
                "Block {} does not meet difficulty {}",
                block.index, block.difficulty
            )));
        }

        // A transaction hash may appear at most once in the whole chain.
        let mut seen = HashSet::new();
        for tx in &block.transactions {
            if !seen.insert(tx.hash.as_str()) || self.store.has_transaction(&tx.hash)? {
                return Err(EmberError::Block(format!(
                    "Block {} repeats transaction {}",
                    block.index, tx.hash
                )));
            }
        }

        self.store.save_block(&mut block)?;
        for tx in &block.transactions {
            self.forget_pending_memory(&tx.hash);
        }
        log::info!("Accepted block {} from peer", block.index);
        self.blocks.push(block.clone());

        let _ = self.events.send(ChainEvent::BlockAppended { block, origin });
        Ok(())
    }

    /// Re-append a block that is already persisted (seen before, validated
    /// then); consensus rules are not re-run.
    pub fn append_known_block(&mut self, block: Block) {
        for tx in &block.transactions {
            self.forget_pending_memory(&tx.hash);
        }
        self.blocks.push(block);
    }

    /// Longest-valid-chain replacement, decided on strict cumulative
    /// difficulty. A concurrent replacement is a no-op. Returns whether the
    /// local chain was replaced.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<bool> {
        if self.replacing_chain.swap(true, Ordering::SeqCst) {
            log::debug!("Chain replacement already in progress");
            return Ok(false);
        }
        let result = self.replace_chain_inner(candidate);
        self.replacing_chain.store(false, Ordering::SeqCst);
        result
    }

    fn replace_chain_inner(&mut self, candidate: Vec<Block>) -> Result<bool> {
        if candidate.len() <= self.blocks.len() {
            log::debug!(
                "Candidate chain of {} blocks is not longer than ours ({})",
                candidate.len(),
                self.blocks.len()
            );
            return Ok(false);
        }
        if !Self::is_valid_chain(&candidate) {
            return Err(EmberError::Chain(
                "Candidate chain failed validation".to_string(),
            ));
        }

        let ours = Self::cumulative_difficulty(&self.blocks);
        let theirs = Self::cumulative_difficulty(&candidate);
        if theirs <= ours {
            log::info!(
                "Keeping local chain: cumulative difficulty {} >= candidate {}",
                ours,
                theirs
            );
            return Ok(false);
        }

        log::info!(
            "Replacing chain: {} blocks (difficulty {}) -> {} blocks (difficulty {})",
            self.blocks.len(),
            ours,
            candidate.len(),
            theirs
        );

        self.store.clear_all()?;
        let mut persisted = Vec::with_capacity(candidate.len());
        for mut block in candidate {
            self.store.save_block(&mut block)?;
            persisted.push(block);
        }
        self.blocks = persisted;

        // Keep mempool entries the new history has not settled; everything
        // else is gone along with the wiped pending table.
        let mut survivors = Vec::new();
        self.pending_hashes.clear();
        for tx in std::mem::take(&mut self.pending) {
            if !self.store.has_transaction(&tx.hash)? {
                self.store.upsert_pending(&tx)?;
                self.pending_hashes.insert(tx.hash.clone());
                survivors.push(tx);
            }
        }
        self.pending = survivors;

        Ok(true)
    }

    /// Structural validity of a full chain: genesis marker, hash linkage,
    /// proof of work, transaction validity.
    pub fn is_valid_chain(blocks: &[Block]) -> bool {
        let first = match blocks.first() {
            Some(block) => block,
            None => return false,
        };
        if first.index != 0 {
            return false;
        }
        // Legacy chains wrote "0" instead of null for the genesis marker.
        if !matches!(first.previous_hash.as_deref(), None | Some("0")) {
            return false;
        }

        for window in blocks.windows(2) {
            let (prior, block) = (&window[0], &window[1]);
            if block.previous_hash.as_deref() != Some(prior.hash.as_str()) {
                return false;
            }
            if block.compute_hash() != block.hash {
                return false;
            }
            if !block.meets_difficulty() {
                return false;
            }
            if !block.has_valid_transactions() {
                return false;
            }
        }
        true
    }

    pub fn is_chain_valid(&self) -> bool {
        Self::is_valid_chain(&self.blocks)
    }

    /// Chain-selection metric: the sum of block difficulties.
    pub fn cumulative_difficulty(blocks: &[Block]) -> u64 {
        blocks.iter().map(|b| b.difficulty as u64).sum()
    }

    pub fn get_balance_of_address(&self, address: &str) -> Result<BalanceReport> {
        let native = self.store.native_balance(address)?;
        let mut tokens = BTreeMap::new();
        for entry in self.store.token_balances_for_address(address)? {
            tokens.insert(
                entry.token_id,
                TokenBalance {
                    symbol: entry.symbol,
                    balance: entry.balance,
                },
            );
        }
        Ok(BalanceReport { native, tokens })
    }

    fn forget_pending(&mut self, hash: &str) -> Result<()> {
        self.store.delete_pending(hash)?;
        self.forget_pending_memory(hash);
        Ok(())
    }

    fn forget_pending_memory(&mut self, hash: &str) {
        if self.pending_hashes.remove(hash) {
            self.pending.retain(|tx| tx.hash != hash);
        }
    }
}
