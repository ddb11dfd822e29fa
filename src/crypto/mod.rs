//! Cryptographic primitives: hashing, secp256k1 keys, Merkle commitments.

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{sha256_hex, sha256_str, EMPTY_HASH};
pub use keys::{derive_address, is_valid_address, verify, KeyPair, PrivateKey, PublicKey};
pub use merkle::{verify_proof, Direction, MerkleNode, MerkleTree, ProofStep};
