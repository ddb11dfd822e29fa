use sha2::{Digest, Sha256};

/// Hex digest of the all-zero hash, used as the Merkle root of an empty
/// transaction list.
pub const EMPTY_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// SHA-256 over raw bytes, returned as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 over a UTF-8 string.
pub fn sha256_str(data: &str) -> String {
    sha256_hex(data.as_bytes())
}

/// Count of leading '0' hex characters in a digest string.
pub fn leading_hex_zeros(hash: &str) -> u32 {
    hash.chars().take_while(|c| *c == '0').count() as u32
}
