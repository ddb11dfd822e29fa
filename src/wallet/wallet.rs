use crate::crypto::keys::{KeyPair, PrivateKey};
use crate::{EmberError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A wallet on disk: one JSON file per address. The core only ever
/// consumes the derived address and the key material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletFile {
    pub address: String,
    pub public_key: String,
    pub private_key: String,
}

impl WalletFile {
    pub fn private_key(&self) -> Result<PrivateKey> {
        PrivateKey::from_hex(&self.private_key)
    }
}

/// Generate a keypair and persist it as `<address>.json` under `dir`.
pub fn create_wallet(dir: &Path) -> Result<WalletFile> {
    let keypair = KeyPair::generate();
    let wallet = WalletFile {
        address: keypair.address(),
        public_key: keypair.public_key.to_hex().to_string(),
        private_key: keypair.private_key.to_hex(),
    };

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", wallet.address));
    std::fs::write(&path, serde_json::to_string_pretty(&wallet)?)?;

    log::info!("Created wallet {}", wallet.address);
    Ok(wallet)
}

pub fn load_wallet(dir: &Path, address: &str) -> Result<WalletFile> {
    let path = dir.join(format!("{}.json", address));
    let content = std::fs::read_to_string(&path)
        .map_err(|_| EmberError::Wallet(format!("Wallet '{}' not found", address)))?;
    let wallet: WalletFile = serde_json::from_str(&content)?;

    if wallet.address != address {
        return Err(EmberError::Wallet(format!(
            "Wallet file for '{}' names address '{}'",
            address, wallet.address
        )));
    }
    Ok(wallet)
}

pub fn list_wallets(dir: &Path) -> Result<Vec<String>> {
    let mut addresses = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(addresses),
    };

    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(address) = name.strip_suffix(".json") {
                addresses.push(address.to_string());
            }
        }
    }
    addresses.sort();
    Ok(addresses)
}
