use crate::core::Transaction;
use crate::crypto::hash::sha256_str;
use crate::crypto::merkle::MerkleTree;
use serde::{Deserialize, Serialize};

/// A block: header fields plus its ordered transactions. Transaction order
/// is part of consensus (the Merkle root commits to it).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub index: u64,
    #[serde(default)]
    pub previous_hash: Option<String>,
    pub timestamp: i64,
    pub difficulty: u32,
    pub nonce: u64,
    pub merkle_root: String,
    #[serde(default)]
    pub origin_transaction_hash: Option<String>,
    pub hash: String,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(
        index: u64,
        previous_hash: Option<String>,
        timestamp: i64,
        transactions: Vec<Transaction>,
        difficulty: u32,
    ) -> Self {
        let merkle_root = Self::calculate_merkle_root(&transactions);
        let origin_transaction_hash = Self::derive_origin_transaction_hash(&transactions);

        let mut block = Self {
            index,
            previous_hash,
            timestamp,
            difficulty,
            nonce: 0,
            merkle_root,
            origin_transaction_hash,
            hash: String::new(),
            transactions,
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn calculate_merkle_root(transactions: &[Transaction]) -> String {
        let leaf_hashes: Vec<String> = transactions.iter().map(|tx| tx.hash.clone()).collect();
        MerkleTree::build(&leaf_hashes).root()
    }

    /// Consensus rule: the block's origin hash is the last transaction's
    /// `origin_transaction_hash`, falling back to the second-to-last
    /// transaction's when the last one (typically the reward) has none.
    pub fn derive_origin_transaction_hash(transactions: &[Transaction]) -> Option<String> {
        let last = transactions.last()?;
        if last.origin_transaction_hash.is_some() {
            return last.origin_transaction_hash.clone();
        }
        transactions
            .len()
            .checked_sub(2)
            .and_then(|i| transactions[i].origin_transaction_hash.clone())
    }

    /// SHA-256 over the concatenated header text; absent fields contribute
    /// the empty string.
    pub fn compute_hash(&self) -> String {
        let preimage = format!(
            "{}{}{}{}{}",
            self.previous_hash.as_deref().unwrap_or(""),
            self.timestamp,
            self.merkle_root,
            self.nonce,
            self.origin_transaction_hash.as_deref().unwrap_or("")
        );
        sha256_str(&preimage)
    }

    pub fn meets_difficulty(&self) -> bool {
        self.hash
            .chars()
            .take(self.difficulty as usize)
            .all(|c| c == '0')
            && self.hash.len() >= self.difficulty as usize
    }

    /// Proof of work: increment the nonce until the hash carries
    /// `difficulty` leading hex zeros. CPU-bound, runs to completion.
    pub fn mine(&mut self) {
        while !self.meets_difficulty() {
            self.nonce += 1;
            self.hash = self.compute_hash();
        }
    }

    /// Every transaction must recompute to its stored hash, and non-reward
    /// transactions must carry a valid signature.
    pub fn has_valid_transactions(&self) -> bool {
        self.transactions.iter().all(|tx| {
            if tx.compute_hash() != tx.hash {
                return false;
            }
            tx.is_reward() || tx.is_valid()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Amount;
    use crate::crypto::hash::EMPTY_HASH;
    use crate::crypto::keys::KeyPair;

    fn reward(to: &str) -> Transaction {
        Transaction::new_reward(to.to_string(), Amount::from_whole(100), 1_700_000_000_000)
    }

    #[test]
    fn test_block_construction() {
        let block = Block::new(0, None, 1_700_000_000_000, vec![reward(&"a".repeat(30))], 2);

        assert_eq!(block.index, 0);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.hash, block.compute_hash());
        assert_ne!(block.merkle_root, EMPTY_HASH);
    }

    #[test]
    fn test_empty_block_merkle_root() {
        assert_eq!(Block::calculate_merkle_root(&[]), EMPTY_HASH);
    }

    #[test]
    fn test_mining_meets_difficulty() {
        let mut block = Block::new(
            0,
            None,
            1_700_000_000_000,
            vec![reward(&"a".repeat(30))],
            1,
        );
        block.mine();

        assert!(block.meets_difficulty());
        assert!(block.hash.starts_with('0'));
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_zero_difficulty_accepts_immediately() {
        let mut block = Block::new(
            0,
            None,
            1_700_000_000_000,
            vec![reward(&"a".repeat(30))],
            0,
        );
        block.mine();
        assert_eq!(block.nonce, 0);
    }

    #[test]
    fn test_origin_hash_from_last_transaction() {
        let keypair = KeyPair::generate();
        let transfer = Transaction::new_transfer(
            keypair.address(),
            "b".repeat(30),
            Amount::from_whole(5),
            None,
            Some("f".repeat(64)),
            1_700_000_000_000,
        );

        let derived = Block::derive_origin_transaction_hash(&[transfer]);
        assert_eq!(derived, Some("f".repeat(64)));
    }

    #[test]
    fn test_origin_hash_falls_back_to_penultimate() {
        let keypair = KeyPair::generate();
        let transfer = Transaction::new_transfer(
            keypair.address(),
            "b".repeat(30),
            Amount::from_whole(5),
            None,
            Some("f".repeat(64)),
            1_700_000_000_000,
        );
        // Reward comes last and has no origin hash of its own.
        let txs = vec![transfer, reward(&"a".repeat(30))];

        assert_eq!(
            Block::derive_origin_transaction_hash(&txs),
            Some("f".repeat(64))
        );
        assert_eq!(Block::derive_origin_transaction_hash(&[]), None);
        assert_eq!(
            Block::derive_origin_transaction_hash(&[reward(&"a".repeat(30))]),
            None
        );
    }

    #[test]
    fn test_has_valid_transactions() {
        let keypair = KeyPair::generate();
        let mut transfer = Transaction::new_transfer(
            keypair.address(),
            "b".repeat(30),
            Amount::from_whole(5),
            None,
            None,
            1_700_000_000_000,
        );
        transfer.sign(&keypair.private_key).unwrap();

        let good = Block::new(
            1,
            Some("0".repeat(64)),
            1_700_000_000_000,
            vec![transfer.clone(), reward(&"a".repeat(30))],
            1,
        );
        assert!(good.has_valid_transactions());

        // A stale stored hash must be caught even if the signature is fine.
        let mut tampered = transfer;
        tampered.amount = Amount::from_whole(50);
        let bad = Block::new(
            1,
            Some("0".repeat(64)),
            1_700_000_000_000,
            vec![tampered],
            1,
        );
        assert!(!bad.has_valid_transactions());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut block = Block::new(
            0,
            None,
            1_700_000_000_000,
            vec![reward(&"a".repeat(30))],
            1,
        );
        block.mine();

        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn test_hash_depends_on_nonce_and_merkle_root() {
        let block = Block::new(
            0,
            None,
            1_700_000_000_000,
            vec![reward(&"a".repeat(30))],
            2,
        );

        let mut other = block.clone();
        other.nonce += 1;
        assert_ne!(block.compute_hash(), other.compute_hash());

        let mut other = block.clone();
        other.merkle_root = "1".repeat(64);
        assert_ne!(block.compute_hash(), other.compute_hash());
    }
}
