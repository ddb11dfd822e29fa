use crate::crypto::hash::{sha256_str, EMPTY_HASH};
use serde::{Deserialize, Serialize};

/// A single node of a block's Merkle tree, retained level by level so the
/// whole tree can be persisted alongside the block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MerkleNode {
    pub level: u32,
    pub index: u32,
    pub hash: String,
    pub left_child_hash: Option<String>,
    pub right_child_hash: Option<String>,
}

/// Which side the current hash sits on when combined with its sibling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

/// One step of an inclusion proof: hash the current value together with
/// `sibling_hash`, on the side named by `direction`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofStep {
    pub sibling_hash: String,
    pub direction: Direction,
}

/// Merkle tree over an ordered list of leaf hashes. Levels are combined
/// pairwise with SHA-256 over the concatenated hex strings; an odd node at
/// any level is promoted unchanged to the next level.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<MerkleNode>>,
}

impl MerkleTree {
    pub fn build(leaf_hashes: &[String]) -> Self {
        if leaf_hashes.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels: Vec<Vec<MerkleNode>> = Vec::new();
        let leaves: Vec<MerkleNode> = leaf_hashes
            .iter()
            .enumerate()
            .map(|(i, hash)| MerkleNode {
                level: 0,
                index: i as u32,
                hash: hash.clone(),
                left_child_hash: None,
                right_child_hash: None,
            })
            .collect();
        levels.push(leaves);

        while levels.last().map(|l| l.len()).unwrap_or(0) > 1 {
            let current = levels.last().cloned().unwrap_or_default();
            let level_no = levels.len() as u32;
            let mut next = Vec::with_capacity(current.len() / 2 + 1);

            for pair in current.chunks(2) {
                let index = next.len() as u32;
                if pair.len() == 2 {
                    let combined = sha256_str(&format!("{}{}", pair[0].hash, pair[1].hash));
                    next.push(MerkleNode {
                        level: level_no,
                        index,
                        hash: combined,
                        left_child_hash: Some(pair[0].hash.clone()),
                        right_child_hash: Some(pair[1].hash.clone()),
                    });
                } else {
                    // Odd node out: promoted unchanged.
                    next.push(MerkleNode {
                        level: level_no,
                        index,
                        hash: pair[0].hash.clone(),
                        left_child_hash: Some(pair[0].hash.clone()),
                        right_child_hash: None,
                    });
                }
            }

            levels.push(next);
        }

        Self { levels }
    }

    pub fn root(&self) -> String {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(|node| node.hash.clone())
            .unwrap_or_else(|| EMPTY_HASH.to_string())
    }

    /// Every node of every level, for persistence.
    pub fn nodes(&self) -> Vec<MerkleNode> {
        self.levels.iter().flatten().cloned().collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(|l| l.len()).unwrap_or(0)
    }

    /// Inclusion proof for the leaf at `leaf_index`. Levels where the node
    /// is promoted unchanged contribute no step.
    pub fn proof(&self, leaf_index: usize) -> Option<Vec<ProofStep>> {
        let leaves = self.levels.first()?;
        if leaf_index >= leaves.len() {
            return None;
        }

        let mut steps = Vec::new();
        let mut index = leaf_index;

        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            if index % 2 == 0 {
                if let Some(sibling) = level.get(index + 1) {
                    steps.push(ProofStep {
                        sibling_hash: sibling.hash.clone(),
                        direction: Direction::Left,
                    });
                }
                // No sibling: promoted unchanged, no step.
            } else {
                steps.push(ProofStep {
                    sibling_hash: level[index - 1].hash.clone(),
                    direction: Direction::Right,
                });
            }
            index /= 2;
        }

        Some(steps)
    }
}

/// Fold a proof path from a leaf hash and compare against the expected root.
pub fn verify_proof(leaf_hash: &str, steps: &[ProofStep], root: &str) -> bool {
    let mut current = leaf_hash.to_string();
    for step in steps {
        current = match step.direction {
            Direction::Left => sha256_str(&format!("{}{}", current, step.sibling_hash)),
            Direction::Right => sha256_str(&format!("{}{}", step.sibling_hash, current)),
        };
    }
    current == root
}
