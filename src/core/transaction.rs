use crate::core::Amount;
use crate::crypto::hash::sha256_str;
use crate::crypto::keys::{self, PrivateKey, PublicKey};
use crate::{EmberError, Result};
use serde::{Deserialize, Serialize};

/// A value transfer (native or token), a token creation, or a mining
/// reward. Reward and token-creation transactions carry no sender, no
/// signature and no public key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    #[serde(default)]
    pub from_address: Option<String>,
    pub to_address: String,
    pub amount: Amount,
    pub timestamp: i64,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub origin_transaction_hash: Option<String>,
    #[serde(default)]
    pub token_id: Option<u64>,
    #[serde(default)]
    pub token_name: Option<String>,
    #[serde(default)]
    pub token_symbol: Option<String>,
    #[serde(default)]
    pub token_total_supply: Option<Amount>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub index_in_block: Option<u32>,
    pub hash: String,
}

/// Hash preimage: the ordered field set serialized as JSON. Signature and
/// public key are deliberately absent, so signing never changes the hash.
#[derive(Serialize)]
struct HashFields<'a> {
    from_address: &'a Option<String>,
    to_address: &'a str,
    amount: String,
    token_id: Option<u64>,
    token_name: &'a Option<String>,
    token_symbol: &'a Option<String>,
    token_total_supply: Option<String>,
    origin_transaction_hash: &'a Option<String>,
    timestamp: i64,
}

impl Transaction {
    /// A native or token transfer from a funded address. The transaction
    /// still has to be signed before it is admissible.
    pub fn new_transfer(
        from_address: String,
        to_address: String,
        amount: Amount,
        token_id: Option<u64>,
        origin_transaction_hash: Option<String>,
        timestamp: i64,
    ) -> Self {
        let mut tx = Self {
            from_address: Some(from_address),
            to_address,
            amount,
            timestamp,
            signature: None,
            public_key: None,
            origin_transaction_hash,
            token_id,
            token_name: None,
            token_symbol: None,
            token_total_supply: None,
            block_hash: None,
            index_in_block: None,
            hash: String::new(),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// A mining or genesis reward: no sender, no signature.
    pub fn new_reward(to_address: String, amount: Amount, timestamp: i64) -> Self {
        let mut tx = Self {
            from_address: None,
            to_address,
            amount,
            timestamp,
            signature: None,
            public_key: None,
            origin_transaction_hash: None,
            token_id: None,
            token_name: None,
            token_symbol: None,
            token_total_supply: None,
            block_hash: None,
            index_in_block: None,
            hash: String::new(),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// Mints a new token: credits `to_address` with `amount` units of the
    /// token and registers the token itself.
    pub fn new_token_creation(
        to_address: String,
        amount: Amount,
        token_id: u64,
        token_name: String,
        token_symbol: String,
        token_total_supply: Amount,
        timestamp: i64,
    ) -> Self {
        let mut tx = Self {
            from_address: None,
            to_address,
            amount,
            timestamp,
            signature: None,
            public_key: None,
            origin_transaction_hash: None,
            token_id: Some(token_id),
            token_name: Some(token_name),
            token_symbol: Some(token_symbol),
            token_total_supply: Some(token_total_supply),
            block_hash: None,
            index_in_block: None,
            hash: String::new(),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    pub fn compute_hash(&self) -> String {
        let fields = HashFields {
            from_address: &self.from_address,
            to_address: &self.to_address,
            amount: self.amount.to_string(),
            token_id: self.token_id,
            token_name: &self.token_name,
            token_symbol: &self.token_symbol,
            token_total_supply: self.token_total_supply.map(|a| a.to_string()),
            origin_transaction_hash: &self.origin_transaction_hash,
            timestamp: self.timestamp,
        };
        let payload = serde_json::to_string(&fields).expect("hash fields always serialize");
        sha256_str(&payload)
    }

    /// No sender: a reward or token-creation transaction.
    pub fn is_reward(&self) -> bool {
        self.from_address.is_none()
    }

    pub fn is_token_creation(&self) -> bool {
        self.token_id.is_some()
            && self.token_name.is_some()
            && self.token_symbol.is_some()
            && self.token_total_supply.is_some()
    }

    pub fn is_token_transfer(&self) -> bool {
        self.token_id.is_some() && !self.is_token_creation()
    }

    /// Sign with the sender's key: sets the public key and a DER signature
    /// over the (recomputed) hash. The hash itself is unchanged by signing.
    pub fn sign(&mut self, private_key: &PrivateKey) -> Result<()> {
        if self.from_address.is_none() {
            return Err(EmberError::Transaction(
                "Reward transactions are not signed".to_string(),
            ));
        }

        self.hash = self.compute_hash();
        let public_key = private_key.public_key();

        if Some(public_key.to_address()) != self.from_address {
            return Err(EmberError::Transaction(
                "Signing key does not match from_address".to_string(),
            ));
        }

        self.signature = Some(private_key.sign_digest(&self.hash)?);
        self.public_key = Some(public_key.to_hex().to_string());
        Ok(())
    }

    /// Reward transactions are valid as-is; everything else needs a
    /// signature by the key its `from_address` was derived from. Malformed
    /// key or signature material counts as invalid, never as a crash.
    pub fn is_valid(&self) -> bool {
        let from_address = match &self.from_address {
            None => return true,
            Some(addr) => addr,
        };

        let (signature, public_key_hex) = match (&self.signature, &self.public_key) {
            (Some(s), Some(p)) => (s, p),
            _ => return false,
        };

        let public_key = match PublicKey::from_hex(public_key_hex) {
            Ok(key) => key,
            Err(_) => return false,
        };

        if &public_key.to_address() != from_address {
            return false;
        }

        keys::verify(public_key_hex, &self.hash, signature)
    }
}
