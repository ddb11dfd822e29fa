use crate::core::{Amount, ChainConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Address credited by the genesis block when none is configured: the
/// first 30 hex chars of the SHA-256 digest of empty input.
pub const DEFAULT_GENESIS_ADDRESS: &str = "e3b0c44298fc1c149afbf4c8996fb9";

/// Node configuration: consensus constants plus the three startup knobs
/// (datastore location, peer listen port, peer list), loadable from a JSON
/// file in the data directory and overridable through the environment
/// (`EMBER_DATA_DIR`, `EMBER_PEER_PORT`, `EMBER_PEERS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub peer_port: u16,
    pub peers: Vec<String>,
    pub difficulty: u32,
    pub mining_reward: Amount,
    pub genesis_supply: Amount,
    pub miner_address: String,
    pub genesis_address: String,
    pub mining_interval_secs: u64,
    pub pending_poll_secs: u64,
    pub heartbeat_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_dir = PathBuf::from(home_dir).join(".emberchain");

        Self {
            data_dir,
            peer_port: 6001,
            peers: Vec::new(),
            difficulty: 2,
            mining_reward: Amount::from_whole(100),
            genesis_supply: Amount::from_whole(1_000_000),
            miner_address: DEFAULT_GENESIS_ADDRESS.to_string(),
            genesis_address: DEFAULT_GENESIS_ADDRESS.to_string(),
            mining_interval_secs: 30,
            pending_poll_secs: 10,
            heartbeat_secs: 30,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let data_dir = match env::var("EMBER_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => Self::default().data_dir,
        };

        let config_path = data_dir.join("config.json");
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)?
        } else {
            let config = Config {
                data_dir: data_dir.clone(),
                ..Config::default()
            };
            config.save()?;
            config
        };
        config.data_dir = data_dir;

        if let Ok(port) = env::var("EMBER_PEER_PORT") {
            config.peer_port = port.parse()?;
        }
        if let Ok(peers) = env::var("EMBER_PEERS") {
            config.peers = peers
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(self.data_dir.join("config.json"), content)?;
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn wallet_dir(&self) -> PathBuf {
        self.data_dir.join("wallets")
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            difficulty: self.difficulty,
            mining_reward: self.mining_reward,
            genesis_supply: self.genesis_supply,
            genesis_address: self.genesis_address.clone(),
            miner_address: self.miner_address.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.mining_reward, Amount::from_whole(100));
        assert_eq!(config.genesis_supply, Amount::from_whole(1_000_000));
        assert_eq!(config.mining_interval_secs, 30);
        assert_eq!(config.pending_poll_secs, 10);
        assert_eq!(config.heartbeat_secs, 30);
        assert_eq!(config.genesis_address.len(), 30);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.peer_port, config.peer_port);
        assert_eq!(back.genesis_address, config.genesis_address);
    }
}
