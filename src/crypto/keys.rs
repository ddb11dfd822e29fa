use crate::crypto::hash::sha256_hex;
use crate::{EmberError, Result};
use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature as EcdsaSignature;
use secp256k1::{Message, PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use std::fmt;

/// Canonical length of a derived address, in hex characters.
pub const ADDRESS_LEN: usize = 30;

/// Minimum address length accepted at the boundary (legacy tolerance).
pub const MIN_ADDRESS_LEN: usize = 24;

#[derive(Debug, Clone)]
pub struct PrivateKey {
    key: SecretKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: Secp256k1PublicKey,
    // Preserve the caller's encoding so the hex round-trips unchanged.
    hex: String,
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl PrivateKey {
    pub fn generate() -> Self {
        let key = SecretKey::new(&mut OsRng);
        Self { key }
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| EmberError::Crypto(format!("Invalid private key hex: {}", e)))?;
        let key = SecretKey::from_slice(&bytes)
            .map_err(|e| EmberError::Crypto(format!("Invalid private key: {}", e)))?;
        Ok(Self { key })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.secret_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        let key = Secp256k1PublicKey::from_secret_key(&secp, &self.key);
        PublicKey {
            key,
            hex: hex::encode(key.serialize()),
        }
    }

    /// Sign a 32-byte digest given as hex; returns the DER signature as hex.
    pub fn sign_digest(&self, digest_hex: &str) -> Result<String> {
        let digest = hex::decode(digest_hex)
            .map_err(|e| EmberError::Crypto(format!("Invalid digest hex: {}", e)))?;
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| EmberError::Crypto(format!("Invalid digest: {}", e)))?;

        let secp = Secp256k1::new();
        let signature = secp.sign_ecdsa(&message, &self.key);
        Ok(hex::encode(signature.serialize_der()))
    }
}

impl PublicKey {
    /// Accepts compressed (66 hex chars) or uncompressed (130 hex chars) keys.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != 66 && hex_str.len() != 130 {
            return Err(EmberError::Crypto(format!(
                "Invalid public key length: {}",
                hex_str.len()
            )));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| EmberError::Crypto(format!("Invalid public key hex: {}", e)))?;
        let key = Secp256k1PublicKey::from_slice(&bytes)
            .map_err(|e| EmberError::Crypto(format!("Invalid public key: {}", e)))?;

        Ok(Self {
            key,
            hex: hex_str.to_lowercase(),
        })
    }

    pub fn to_hex(&self) -> &str {
        &self.hex
    }

    /// First 30 hex chars of SHA-256 over the encoded key bytes.
    pub fn to_address(&self) -> String {
        derive_address_from_bytes(&hex::decode(&self.hex).expect("validated hex"))
    }

    pub fn verify_digest(&self, digest_hex: &str, signature_der_hex: &str) -> Result<bool> {
        let digest = hex::decode(digest_hex)
            .map_err(|e| EmberError::Crypto(format!("Invalid digest hex: {}", e)))?;
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| EmberError::Crypto(format!("Invalid digest: {}", e)))?;
        let der = hex::decode(signature_der_hex)
            .map_err(|e| EmberError::Crypto(format!("Invalid signature hex: {}", e)))?;
        let signature = EcdsaSignature::from_der(&der)
            .map_err(|e| EmberError::Crypto(format!("Invalid DER signature: {}", e)))?;

        let secp = Secp256k1::new();
        match secp.verify_ecdsa(&message, &signature, &self.key) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

impl KeyPair {
    pub fn generate() -> Self {
        let private_key = PrivateKey::generate();
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    pub fn address(&self) -> String {
        self.public_key.to_address()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

fn derive_address_from_bytes(public_key_bytes: &[u8]) -> String {
    sha256_hex(public_key_bytes)[..ADDRESS_LEN].to_string()
}

/// Derive the address for a public key given as hex (66 or 130 chars).
pub fn derive_address(public_key_hex: &str) -> Result<String> {
    let key = PublicKey::from_hex(public_key_hex)?;
    Ok(key.to_address())
}

/// Verify a DER signature over a hex digest. Any malformed input counts as
/// an invalid signature rather than an error.
pub fn verify(public_key_hex: &str, digest_hex: &str, signature_der_hex: &str) -> bool {
    match PublicKey::from_hex(public_key_hex) {
        Ok(key) => key
            .verify_digest(digest_hex, signature_der_hex)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Addresses of 24-30 hex chars are accepted at the boundary; derivations
/// always produce 30.
pub fn is_valid_address(address: &str) -> bool {
    (MIN_ADDRESS_LEN..=ADDRESS_LEN).contains(&address.len())
        && address.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256_str;

    #[test]
    fn test_key_generation() {
        let keypair = KeyPair::generate();
        let address = keypair.address();

        assert_eq!(address.len(), ADDRESS_LEN);
        assert!(is_valid_address(&address));
    }

    #[test]
    fn test_private_key_hex_roundtrip() -> Result<()> {
        let private_key = PrivateKey::generate();
        let restored = PrivateKey::from_hex(&private_key.to_hex())?;

        assert_eq!(private_key.to_hex(), restored.to_hex());
        Ok(())
    }

    #[test]
    fn test_sign_and_verify() -> Result<()> {
        let keypair = KeyPair::generate();
        let digest = sha256_str("payload");

        let signature = keypair.private_key.sign_digest(&digest)?;
        assert!(verify(keypair.public_key.to_hex(), &digest, &signature));

        let other_digest = sha256_str("tampered");
        assert!(!verify(keypair.public_key.to_hex(), &other_digest, &signature));
        Ok(())
    }

    #[test]
    fn test_verify_rejects_garbage_without_error() {
        let digest = sha256_str("payload");
        assert!(!verify("02deadbeef", &digest, "3045"));
        assert!(!verify("not hex at all", &digest, "3045"));
    }

    #[test]
    fn test_public_key_lengths() {
        let keypair = KeyPair::generate();
        let compressed = keypair.public_key.to_hex().to_string();
        assert_eq!(compressed.len(), 66);
        assert!(PublicKey::from_hex(&compressed).is_ok());

        // Uncompressed form of the same key is also accepted, and derives a
        // different (but equally valid) address.
        let uncompressed = hex::encode(
            Secp256k1PublicKey::from_slice(&hex::decode(&compressed).unwrap())
                .unwrap()
                .serialize_uncompressed(),
        );
        assert_eq!(uncompressed.len(), 130);
        assert!(PublicKey::from_hex(&uncompressed).is_ok());

        assert!(PublicKey::from_hex(&compressed[..64]).is_err());
    }

    #[test]
    fn test_address_derivation_matches_sha256() {
        let keypair = KeyPair::generate();
        let bytes = hex::decode(keypair.public_key.to_hex()).unwrap();
        let expected = &sha256_hex(&bytes)[..ADDRESS_LEN];

        assert_eq!(keypair.address(), expected);
    }

    #[test]
    fn test_address_validation_bounds() {
        assert!(is_valid_address(&"a".repeat(24)));
        assert!(is_valid_address(&"a".repeat(30)));
        assert!(!is_valid_address(&"a".repeat(23)));
        assert!(!is_valid_address(&"a".repeat(31)));
        assert!(!is_valid_address(&"z".repeat(30)));
    }
}
