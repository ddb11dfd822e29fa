use crate::core::{Amount, Block, Transaction};
use crate::crypto::merkle::{MerkleNode, MerkleTree, ProofStep};
use crate::{EmberError, Result};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

// Logical tables, one column family each.
const CF_BLOCKS: &str = "blocks";
const CF_BLOCK_INDEX: &str = "block_index";
const CF_TRANSACTIONS: &str = "transactions";
const CF_PENDING_TRANSACTIONS: &str = "pending_transactions";
const CF_ADDRESS_BALANCES: &str = "address_balances";
const CF_TOKENS: &str = "tokens";
const CF_TOKEN_SYMBOLS: &str = "token_symbols";
const CF_TOKEN_BALANCES: &str = "token_balances";
const CF_MERKLE_NODES: &str = "merkle_nodes";
const CF_MERKLE_PROOF_PATHS: &str = "merkle_proof_paths";

const ALL_CFS: [&str; 10] = [
    CF_BLOCKS,
    CF_BLOCK_INDEX,
    CF_TRANSACTIONS,
    CF_PENDING_TRANSACTIONS,
    CF_ADDRESS_BALANCES,
    CF_TOKENS,
    CF_TOKEN_SYMBOLS,
    CF_TOKEN_BALANCES,
    CF_MERKLE_NODES,
    CF_MERKLE_PROOF_PATHS,
];

/// A registered token, written once by its creation transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenRecord {
    pub token_id: u64,
    pub name: String,
    pub symbol: String,
    pub total_supply: Amount,
    pub creator_address: String,
    pub timestamp: i64,
}

/// One row of the token-balance join: balance plus the token's symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenBalanceEntry {
    pub token_id: u64,
    pub symbol: String,
    pub balance: Amount,
}

/// The authoritative on-disk view: blocks, transactions, balances, tokens,
/// Merkle nodes and proof paths. All other components query and mutate the
/// chain's state through this store.
pub struct Store {
    db: Arc<DB>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, ALL_CFS)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EmberError::Storage(format!("Column family '{}' not found", name)))
    }

    fn index_key(index: u64) -> String {
        format!("{:020}", index)
    }

    fn token_key(token_id: u64) -> String {
        format!("{:020}", token_id)
    }

    fn token_balance_key(address: &str, token_id: u64) -> String {
        format!("{}/{:020}", address, token_id)
    }

    // -- block save ---------------------------------------------------------

    /// Persist a block as one atomic write: the block row, its index entry,
    /// token registrations and balances, transaction rows with block
    /// linkage, native balance updates, Merkle nodes and per-leaf proof
    /// paths, and deletion of any pending rows the block settles. A failure
    /// while assembling the batch commits nothing.
    pub fn save_block(&self, block: &mut Block) -> Result<()> {
        let block_hash = block.hash.clone();
        for (i, tx) in block.transactions.iter_mut().enumerate() {
            tx.block_hash = Some(block_hash.clone());
            tx.index_in_block = Some(i as u32);
        }

        let mut batch = WriteBatch::default();
        let mut native: HashMap<String, Amount> = HashMap::new();
        let mut token: HashMap<(String, u64), Amount> = HashMap::new();

        for tx in &block.transactions {
            if tx.is_token_creation() {
                self.stage_token_creation(&mut batch, tx)?;
                let token_id = tx.token_id.expect("creation carries token_id");
                self.credit_token(&mut token, &tx.to_address, token_id, tx.amount)?;
            } else if let Some(token_id) = tx.token_id {
                if let Some(from) = &tx.from_address {
                    self.debit_token(&mut token, from, token_id, tx.amount)?;
                }
                self.credit_token(&mut token, &tx.to_address, token_id, tx.amount)?;
            } else {
                if let Some(from) = &tx.from_address {
                    self.debit_native(&mut native, from, tx.amount)?;
                }
                self.credit_native(&mut native, &tx.to_address, tx.amount)?;
            }

            batch.put_cf(
                self.cf(CF_TRANSACTIONS)?,
                tx.hash.as_bytes(),
                serde_json::to_vec(tx)?,
            );
            batch.delete_cf(self.cf(CF_PENDING_TRANSACTIONS)?, tx.hash.as_bytes());
        }

        for (address, balance) in &native {
            batch.put_cf(
                self.cf(CF_ADDRESS_BALANCES)?,
                address.as_bytes(),
                serde_json::to_vec(balance)?,
            );
        }
        for ((address, token_id), balance) in &token {
            batch.put_cf(
                self.cf(CF_TOKEN_BALANCES)?,
                Self::token_balance_key(address, *token_id).as_bytes(),
                serde_json::to_vec(balance)?,
            );
        }

        self.stage_merkle(&mut batch, block)?;

        batch.put_cf(
            self.cf(CF_BLOCKS)?,
            block_hash.as_bytes(),
            serde_json::to_vec(&block)?,
        );
        batch.put_cf(
            self.cf(CF_BLOCK_INDEX)?,
            Self::index_key(block.index).as_bytes(),
            block_hash.as_bytes(),
        );

        self.db.write(batch)?;
        log::debug!("Saved block {} at index {}", block_hash, block.index);
        Ok(())
    }

    fn stage_token_creation(&self, batch: &mut WriteBatch, tx: &Transaction) -> Result<()> {
        let token_id = tx.token_id.expect("creation carries token_id");
        let symbol = tx.token_symbol.clone().expect("creation carries symbol");

        if let Some(existing) = self.token_id_for_symbol(&symbol)? {
            if existing != token_id {
                return Err(EmberError::DuplicateTokenSymbol(symbol));
            }
        }

        let record = TokenRecord {
            token_id,
            name: tx.token_name.clone().expect("creation carries name"),
            symbol: symbol.clone(),
            total_supply: tx.token_total_supply.expect("creation carries supply"),
            creator_address: tx.to_address.clone(),
            timestamp: tx.timestamp,
        };

        batch.put_cf(
            self.cf(CF_TOKENS)?,
            Self::token_key(token_id).as_bytes(),
            serde_json::to_vec(&record)?,
        );
        batch.put_cf(
            self.cf(CF_TOKEN_SYMBOLS)?,
            symbol.as_bytes(),
            token_id.to_string().as_bytes(),
        );
        Ok(())
    }

    fn stage_merkle(&self, batch: &mut WriteBatch, block: &Block) -> Result<()> {
        let leaf_hashes: Vec<String> =
            block.transactions.iter().map(|tx| tx.hash.clone()).collect();
        let tree = MerkleTree::build(&leaf_hashes);

        for node in tree.nodes() {
            let key = format!("{}/{:010}/{:010}", block.hash, node.level, node.index);
            batch.put_cf(
                self.cf(CF_MERKLE_NODES)?,
                key.as_bytes(),
                serde_json::to_vec(&node)?,
            );
        }

        for (i, tx_hash) in leaf_hashes.iter().enumerate() {
            let proof = tree.proof(i).expect("leaf index in range");
            let key = format!("{}/{}", block.hash, tx_hash);
            batch.put_cf(
                self.cf(CF_MERKLE_PROOF_PATHS)?,
                key.as_bytes(),
                serde_json::to_vec(&proof)?,
            );
        }
        Ok(())
    }

    fn credit_native(
        &self,
        cache: &mut HashMap<String, Amount>,
        address: &str,
        amount: Amount,
    ) -> Result<()> {
        let current = match cache.get(address) {
            Some(a) => *a,
            None => self.native_balance(address)?,
        };
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| EmberError::Storage(format!("Balance overflow for {}", address)))?;
        cache.insert(address.to_string(), updated);
        Ok(())
    }

    fn debit_native(
        &self,
        cache: &mut HashMap<String, Amount>,
        address: &str,
        amount: Amount,
    ) -> Result<()> {
        let current = match cache.get(address) {
            Some(a) => *a,
            None => self.native_balance(address)?,
        };
        let updated = current.checked_sub(amount).ok_or_else(|| {
            EmberError::Storage(format!("Balance underflow for {}", address))
        })?;
        cache.insert(address.to_string(), updated);
        Ok(())
    }

    fn credit_token(
        &self,
        cache: &mut HashMap<(String, u64), Amount>,
        address: &str,
        token_id: u64,
        amount: Amount,
    ) -> Result<()> {
        let key = (address.to_string(), token_id);
        let current = match cache.get(&key) {
            Some(a) => *a,
            None => self.token_balance(address, token_id)?,
        };
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| EmberError::Storage(format!("Token balance overflow for {}", address)))?;
        cache.insert(key, updated);
        Ok(())
    }

    fn debit_token(
        &self,
        cache: &mut HashMap<(String, u64), Amount>,
        address: &str,
        token_id: u64,
        amount: Amount,
    ) -> Result<()> {
        let key = (address.to_string(), token_id);
        let current = match cache.get(&key) {
            Some(a) => *a,
            None => self.token_balance(address, token_id)?,
        };
        let updated = current.checked_sub(amount).ok_or_else(|| {
            EmberError::Storage(format!("Token balance underflow for {}", address))
        })?;
        cache.insert(key, updated);
        Ok(())
    }

    // -- block load ---------------------------------------------------------

    /// Fetch and validate a block. Transactions must recompute to their
    /// stored hashes; the block hash must recompute too, except at index 0
    /// (legacy genesis tolerance).
    pub fn block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        let bytes = match self.db.get_cf(self.cf(CF_BLOCKS)?, hash.as_bytes())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let block: Block = serde_json::from_slice(&bytes)?;

        if !block.has_valid_transactions() {
            return Err(EmberError::ChainInconsistent(format!(
                "Stored block {} has invalid transactions",
                hash
            )));
        }
        if block.index > 0 && block.compute_hash() != block.hash {
            return Err(EmberError::ChainInconsistent(format!(
                "Stored block {} does not recompute to its hash",
                hash
            )));
        }
        Ok(Some(block))
    }

    pub fn block_by_index(&self, index: u64) -> Result<Option<Block>> {
        let key = Self::index_key(index);
        match self.db.get_cf(self.cf(CF_BLOCK_INDEX)?, key.as_bytes())? {
            Some(hash_bytes) => {
                let hash = String::from_utf8(hash_bytes.to_vec())
                    .map_err(|e| EmberError::Storage(format!("Invalid block hash: {}", e)))?;
                self.block_by_hash(&hash)
            }
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &str) -> Result<bool> {
        Ok(self
            .db
            .get_cf(self.cf(CF_BLOCKS)?, hash.as_bytes())?
            .is_some())
    }

    pub fn block_count(&self) -> Result<u64> {
        let mut count = 0u64;
        for item in self
            .db
            .iterator_cf(self.cf(CF_BLOCK_INDEX)?, IteratorMode::Start)
        {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// All blocks in ascending index order, each validated as it loads.
    pub fn blocks_ordered(&self) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for item in self
            .db
            .iterator_cf(self.cf(CF_BLOCK_INDEX)?, IteratorMode::Start)
        {
            let (_, hash_bytes) = item?;
            let hash = String::from_utf8(hash_bytes.to_vec())
                .map_err(|e| EmberError::Storage(format!("Invalid block hash: {}", e)))?;
            let block = self.block_by_hash(&hash)?.ok_or_else(|| {
                EmberError::ChainInconsistent(format!("Indexed block {} missing", hash))
            })?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    // -- transactions -------------------------------------------------------

    pub fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>> {
        match self.db.get_cf(self.cf(CF_TRANSACTIONS)?, hash.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_transaction(&self, hash: &str) -> Result<bool> {
        Ok(self
            .db
            .get_cf(self.cf(CF_TRANSACTIONS)?, hash.as_bytes())?
            .is_some())
    }

    /// The head of an address's origin-transaction chain: its most recent
    /// outgoing transaction, or failing that the most recent token creation
    /// credited to it.
    pub fn latest_transaction_for_address(&self, address: &str) -> Result<Option<Transaction>> {
        let mut latest_outgoing: Option<Transaction> = None;
        let mut latest_creation: Option<Transaction> = None;

        for item in self
            .db
            .iterator_cf(self.cf(CF_TRANSACTIONS)?, IteratorMode::Start)
        {
            let (_, bytes) = item?;
            let tx: Transaction = serde_json::from_slice(&bytes)?;

            if tx.from_address.as_deref() == Some(address) {
                if latest_outgoing
                    .as_ref()
                    .map(|best| tx.timestamp > best.timestamp)
                    .unwrap_or(true)
                {
                    latest_outgoing = Some(tx);
                }
            } else if tx.to_address == address && tx.is_token_creation() {
                if latest_creation
                    .as_ref()
                    .map(|best| tx.timestamp > best.timestamp)
                    .unwrap_or(true)
                {
                    latest_creation = Some(tx);
                }
            }
        }

        Ok(latest_outgoing.or(latest_creation))
    }

    // -- pending transactions -----------------------------------------------

    /// Idempotent on the transaction hash.
    pub fn upsert_pending(&self, tx: &Transaction) -> Result<()> {
        self.db.put_cf(
            self.cf(CF_PENDING_TRANSACTIONS)?,
            tx.hash.as_bytes(),
            serde_json::to_vec(tx)?,
        )?;
        Ok(())
    }

    pub fn delete_pending(&self, hash: &str) -> Result<()> {
        self.db
            .delete_cf(self.cf(CF_PENDING_TRANSACTIONS)?, hash.as_bytes())?;
        Ok(())
    }

    pub fn pending_transactions(&self) -> Result<Vec<Transaction>> {
        let mut pending = Vec::new();
        for item in self
            .db
            .iterator_cf(self.cf(CF_PENDING_TRANSACTIONS)?, IteratorMode::Start)
        {
            let (_, bytes) = item?;
            pending.push(serde_json::from_slice::<Transaction>(&bytes)?);
        }
        pending.sort_by_key(|tx| tx.timestamp);
        Ok(pending)
    }

    // -- balances -----------------------------------------------------------

    pub fn native_balance(&self, address: &str) -> Result<Amount> {
        match self
            .db
            .get_cf(self.cf(CF_ADDRESS_BALANCES)?, address.as_bytes())?
        {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Amount::ZERO),
        }
    }

    pub fn token_balance(&self, address: &str, token_id: u64) -> Result<Amount> {
        let key = Self::token_balance_key(address, token_id);
        match self
            .db
            .get_cf(self.cf(CF_TOKEN_BALANCES)?, key.as_bytes())?
        {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Amount::ZERO),
        }
    }

    /// The `(address, token_id, symbol, balance)` join for balance queries.
    pub fn token_balances_for_address(&self, address: &str) -> Result<Vec<TokenBalanceEntry>> {
        let prefix = format!("{}/", address);
        let mut entries = Vec::new();

        let iter = self.db.iterator_cf(
            self.cf(CF_TOKEN_BALANCES)?,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );
        for item in iter {
            let (key, bytes) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let key_str = String::from_utf8(key.to_vec())
                .map_err(|e| EmberError::Storage(format!("Invalid token balance key: {}", e)))?;
            let token_id: u64 = key_str[prefix.len()..]
                .parse()
                .map_err(|e| EmberError::Storage(format!("Invalid token id in key: {}", e)))?;

            let symbol = self
                .token_by_id(token_id)?
                .map(|record| record.symbol)
                .unwrap_or_default();
            entries.push(TokenBalanceEntry {
                token_id,
                symbol,
                balance: serde_json::from_slice(&bytes)?,
            });
        }
        Ok(entries)
    }

    // -- tokens -------------------------------------------------------------

    pub fn token_by_id(&self, token_id: u64) -> Result<Option<TokenRecord>> {
        let key = Self::token_key(token_id);
        match self.db.get_cf(self.cf(CF_TOKENS)?, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn token_id_for_symbol(&self, symbol: &str) -> Result<Option<u64>> {
        match self.db.get_cf(self.cf(CF_TOKEN_SYMBOLS)?, symbol.as_bytes())? {
            Some(bytes) => {
                let id = String::from_utf8(bytes.to_vec())
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| EmberError::Storage("Invalid token symbol row".to_string()))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    pub fn next_token_id(&self) -> Result<u64> {
        let mut max_id = 0u64;
        for item in self.db.iterator_cf(self.cf(CF_TOKENS)?, IteratorMode::Start) {
            let (_, bytes) = item?;
            let record: TokenRecord = serde_json::from_slice(&bytes)?;
            max_id = max_id.max(record.token_id);
        }
        for tx in self.pending_transactions()? {
            if tx.is_token_creation() {
                max_id = max_id.max(tx.token_id.unwrap_or(0));
            }
        }
        Ok(max_id + 1)
    }

    // -- merkle -------------------------------------------------------------

    pub fn merkle_nodes_for_block(&self, block_hash: &str) -> Result<Vec<MerkleNode>> {
        let prefix = format!("{}/", block_hash);
        let mut nodes = Vec::new();

        let iter = self.db.iterator_cf(
            self.cf(CF_MERKLE_NODES)?,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );
        for item in iter {
            let (key, bytes) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            nodes.push(serde_json::from_slice::<MerkleNode>(&bytes)?);
        }
        Ok(nodes)
    }

    pub fn proof_path(&self, block_hash: &str, tx_hash: &str) -> Result<Option<Vec<ProofStep>>> {
        let key = format!("{}/{}", block_hash, tx_hash);
        match self
            .db
            .get_cf(self.cf(CF_MERKLE_PROOF_PATHS)?, key.as_bytes())?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // -- chain replacement --------------------------------------------------

    /// Wipe every table. Chain replacement clears the derived state and
    /// re-persists the incoming blocks through the normal save path.
    pub fn clear_all(&self) -> Result<()> {
        let mut batch = WriteBatch::default();
        for name in ALL_CFS {
            let cf = self.cf(name)?;
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                let (key, _) = item?;
                batch.delete_cf(cf, key);
            }
        }
        self.db.write(batch)?;
        log::info!("Cleared all persisted chain state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use crate::crypto::merkle::verify_proof;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("state")).unwrap();
        (dir, store)
    }

    fn mined_block(index: u64, previous_hash: Option<String>, txs: Vec<Transaction>) -> Block {
        let mut block = Block::new(index, previous_hash, 1_700_000_000_000, txs, 1);
        block.mine();
        block
    }

    #[test]
    fn test_save_and_load_block() -> Result<()> {
        let (_dir, store) = open_store();

        let reward = Transaction::new_reward(
            "a".repeat(30),
            Amount::from_whole(1_000_000),
            1_700_000_000_000,
        );
        let mut block = mined_block(0, None, vec![reward]);
        store.save_block(&mut block)?;

        let loaded = store.block_by_hash(&block.hash)?.unwrap();
        assert_eq!(loaded, block);
        assert_eq!(store.block_by_index(0)?.unwrap().hash, block.hash);
        assert_eq!(store.block_count()?, 1);

        // Linkage was stamped before persisting.
        assert_eq!(loaded.transactions[0].block_hash.as_deref(), Some(block.hash.as_str()));
        assert_eq!(loaded.transactions[0].index_in_block, Some(0));
        Ok(())
    }

    #[test]
    fn test_balances_track_transfers() -> Result<()> {
        let (_dir, store) = open_store();
        let keypair = KeyPair::generate();
        let sender = keypair.address();

        let mut genesis = mined_block(
            0,
            None,
            vec![Transaction::new_reward(
                sender.clone(),
                Amount::from_whole(1000),
                1_700_000_000_000,
            )],
        );
        store.save_block(&mut genesis)?;
        assert_eq!(store.native_balance(&sender)?, Amount::from_whole(1000));

        let mut transfer = Transaction::new_transfer(
            sender.clone(),
            "b".repeat(30),
            Amount::from_whole(250),
            None,
            None,
            1_700_000_000_001,
        );
        transfer.sign(&keypair.private_key).unwrap();

        let mut block = mined_block(1, Some(genesis.hash.clone()), vec![transfer]);
        store.save_block(&mut block)?;

        assert_eq!(store.native_balance(&sender)?, Amount::from_whole(750));
        assert_eq!(
            store.native_balance(&"b".repeat(30))?,
            Amount::from_whole(250)
        );
        Ok(())
    }

    #[test]
    fn test_balance_underflow_commits_nothing() -> Result<()> {
        let (_dir, store) = open_store();
        let keypair = KeyPair::generate();
        let sender = keypair.address();

        let mut transfer = Transaction::new_transfer(
            sender.clone(),
            "b".repeat(30),
            Amount::from_whole(10),
            None,
            None,
            1_700_000_000_000,
        );
        transfer.sign(&keypair.private_key).unwrap();

        let mut block = mined_block(0, None, vec![transfer]);
        assert!(store.save_block(&mut block).is_err());

        assert!(!store.has_block(&block.hash)?);
        assert_eq!(store.native_balance(&"b".repeat(30))?, Amount::ZERO);
        Ok(())
    }

    #[test]
    fn test_token_creation_and_transfer() -> Result<()> {
        let (_dir, store) = open_store();
        let creator_pair = KeyPair::generate();
        let creator = creator_pair.address();

        let creation = Transaction::new_token_creation(
            creator.clone(),
            Amount::from_whole(1000),
            1,
            "Token".to_string(),
            "TKN".to_string(),
            Amount::from_whole(1000),
            1_700_000_000_000,
        );
        let mut block = mined_block(0, None, vec![creation]);
        store.save_block(&mut block)?;

        assert_eq!(store.token_balance(&creator, 1)?, Amount::from_whole(1000));
        let record = store.token_by_id(1)?.unwrap();
        assert_eq!(record.symbol, "TKN");
        assert_eq!(record.creator_address, creator);
        assert_eq!(store.token_id_for_symbol("TKN")?, Some(1));
        assert_eq!(store.next_token_id()?, 2);

        let mut transfer = Transaction::new_transfer(
            creator.clone(),
            "b".repeat(30),
            Amount::from_whole(250),
            Some(1),
            None,
            1_700_000_000_001,
        );
        transfer.sign(&creator_pair.private_key).unwrap();
        let mut block2 = mined_block(1, Some(block.hash.clone()), vec![transfer]);
        store.save_block(&mut block2)?;

        assert_eq!(store.token_balance(&creator, 1)?, Amount::from_whole(750));
        assert_eq!(
            store.token_balance(&"b".repeat(30), 1)?,
            Amount::from_whole(250)
        );

        let entries = store.token_balances_for_address(&creator)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].symbol, "TKN");
        assert_eq!(entries[0].balance, Amount::from_whole(750));
        Ok(())
    }

    #[test]
    fn test_duplicate_token_symbol_rejected() -> Result<()> {
        let (_dir, store) = open_store();

        let first = Transaction::new_token_creation(
            "a".repeat(30),
            Amount::from_whole(100),
            1,
            "First".to_string(),
            "DUP".to_string(),
            Amount::from_whole(100),
            1_700_000_000_000,
        );
        let mut block = mined_block(0, None, vec![first]);
        store.save_block(&mut block)?;

        let second = Transaction::new_token_creation(
            "b".repeat(30),
            Amount::from_whole(100),
            2,
            "Second".to_string(),
            "DUP".to_string(),
            Amount::from_whole(100),
            1_700_000_000_001,
        );
        let mut block2 = mined_block(1, Some(block.hash.clone()), vec![second]);

        match store.save_block(&mut block2) {
            Err(EmberError::DuplicateTokenSymbol(symbol)) => assert_eq!(symbol, "DUP"),
            other => panic!("expected DuplicateTokenSymbol, got {:?}", other.err()),
        }
        Ok(())
    }

    #[test]
    fn test_merkle_proofs_persisted() -> Result<()> {
        let (_dir, store) = open_store();
        let keypair = KeyPair::generate();

        let mut genesis = mined_block(
            0,
            None,
            vec![Transaction::new_reward(
                keypair.address(),
                Amount::from_whole(1000),
                1_700_000_000_000,
            )],
        );
        store.save_block(&mut genesis)?;

        let mut transfer = Transaction::new_transfer(
            keypair.address(),
            "b".repeat(30),
            Amount::from_whole(10),
            None,
            None,
            1_700_000_000_001,
        );
        transfer.sign(&keypair.private_key).unwrap();
        let reward = Transaction::new_reward(
            "c".repeat(30),
            Amount::from_whole(100),
            1_700_000_000_002,
        );

        let mut block = mined_block(1, Some(genesis.hash.clone()), vec![transfer, reward]);
        store.save_block(&mut block)?;

        for tx in &block.transactions {
            let proof = store.proof_path(&block.hash, &tx.hash)?.unwrap();
            assert!(verify_proof(&tx.hash, &proof, &block.merkle_root));
        }

        let nodes = store.merkle_nodes_for_block(&block.hash)?;
        // Two leaves plus the root.
        assert_eq!(nodes.len(), 3);
        Ok(())
    }

    #[test]
    fn test_pending_upsert_is_idempotent() -> Result<()> {
        let (_dir, store) = open_store();
        let keypair = KeyPair::generate();
        let mut tx = Transaction::new_transfer(
            keypair.address(),
            "b".repeat(30),
            Amount::from_whole(10),
            None,
            None,
            1_700_000_000_000,
        );
        tx.sign(&keypair.private_key).unwrap();

        store.upsert_pending(&tx)?;
        store.upsert_pending(&tx)?;

        assert_eq!(store.pending_transactions()?.len(), 1);
        store.delete_pending(&tx.hash)?;
        assert!(store.pending_transactions()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_latest_transaction_for_address() -> Result<()> {
        let (_dir, store) = open_store();
        let keypair = KeyPair::generate();
        let sender = keypair.address();

        let mut genesis = mined_block(
            0,
            None,
            vec![Transaction::new_reward(
                sender.clone(),
                Amount::from_whole(1000),
                1_700_000_000_000,
            )],
        );
        store.save_block(&mut genesis)?;

        // No outgoing yet and the reward is not a token creation.
        assert!(store.latest_transaction_for_address(&sender)?.is_none());

        let mut first = Transaction::new_transfer(
            sender.clone(),
            "b".repeat(30),
            Amount::from_whole(10),
            None,
            None,
            1_700_000_000_001,
        );
        first.sign(&keypair.private_key).unwrap();
        let mut second = Transaction::new_transfer(
            sender.clone(),
            "b".repeat(30),
            Amount::from_whole(20),
            None,
            Some(first.hash.clone()),
            1_700_000_000_002,
        );
        second.sign(&keypair.private_key).unwrap();

        let mut block = mined_block(
            1,
            Some(genesis.hash.clone()),
            vec![first, second.clone()],
        );
        store.save_block(&mut block)?;

        let latest = store.latest_transaction_for_address(&sender)?.unwrap();
        assert_eq!(latest.hash, second.hash);
        Ok(())
    }

    #[test]
    fn test_clear_all() -> Result<()> {
        let (_dir, store) = open_store();

        let mut block = mined_block(
            0,
            None,
            vec![Transaction::new_reward(
                "a".repeat(30),
                Amount::from_whole(1000),
                1_700_000_000_000,
            )],
        );
        store.save_block(&mut block)?;
        assert_eq!(store.block_count()?, 1);

        store.clear_all()?;
        assert_eq!(store.block_count()?, 0);
        assert_eq!(store.native_balance(&"a".repeat(30))?, Amount::ZERO);
        assert!(store.blocks_ordered()?.is_empty());
        Ok(())
    }
}
