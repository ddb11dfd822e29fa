use crate::core::Chain;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Time-driven block assembly: a slow interval that always attempts to
/// mine, and a fast poll that mines as soon as anything is pending. Both
/// paths are serialized through one mining lock so the two timers can never
/// assemble blocks concurrently.
pub struct Miner {
    chain: Arc<RwLock<Chain>>,
    mining_lock: Arc<Mutex<()>>,
    reward_address: String,
    interval_secs: u64,
    poll_secs: u64,
}

impl Miner {
    pub fn new(
        chain: Arc<RwLock<Chain>>,
        reward_address: String,
        interval_secs: u64,
        poll_secs: u64,
    ) -> Self {
        Self {
            chain,
            mining_lock: Arc::new(Mutex::new(())),
            reward_address,
            interval_secs,
            poll_secs,
        }
    }

    /// One guarded mining attempt. The lock is released on every exit path,
    /// including store failures.
    pub async fn mine_once(&self) {
        let _guard = self.mining_lock.lock().await;

        let result = {
            let mut chain = self.chain.write().unwrap();
            chain.mine_pending_transactions(&self.reward_address)
        };

        match result {
            Ok(Some(block)) => {
                log::info!("Mined block {} ({})", block.index, block.hash);
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Mining attempt failed: {}", e);
            }
        }
    }

    /// Spawn the two mining timers; runs until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
            let mut poll = tokio::time::interval(Duration::from_secs(self.poll_secs));
            // The first tick of each interval fires immediately; skip it so
            // a fresh node does not mine before peers have a chance to sync.
            interval.tick().await;
            poll.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.mine_once().await;
                    }
                    _ = poll.tick() => {
                        let has_pending = self
                            .chain
                            .read()
                            .unwrap()
                            .has_pending();
                        if has_pending {
                            self.mine_once().await;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Amount, ChainConfig, Transaction};
    use crate::crypto::keys::KeyPair;
    use crate::storage::Store;
    use tempfile::TempDir;

    fn chain_fixture() -> (TempDir, Arc<RwLock<Chain>>, KeyPair) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path().join("state")).unwrap());
        let genesis_keys = KeyPair::generate();
        let config = ChainConfig {
            difficulty: 1,
            mining_reward: Amount::from_whole(100),
            genesis_supply: Amount::from_whole(1_000_000),
            genesis_address: genesis_keys.address(),
            miner_address: "d".repeat(30),
        };
        let chain = Chain::init(config, store, false).unwrap();
        (dir, Arc::new(RwLock::new(chain)), genesis_keys)
    }

    #[tokio::test]
    async fn test_mine_once_produces_block() {
        let (_dir, chain, genesis_keys) = chain_fixture();
        let miner = Miner::new(chain.clone(), "d".repeat(30), 30, 10);

        let mut tx = Transaction::new_transfer(
            genesis_keys.address(),
            "a".repeat(30),
            Amount::from_whole(1),
            None,
            None,
            chrono::Utc::now().timestamp_millis(),
        );
        tx.sign(&genesis_keys.private_key).unwrap();
        chain
            .write()
            .unwrap()
            .add_pending_transaction(tx, None)
            .unwrap();

        miner.mine_once().await;
        assert_eq!(chain.read().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mine_once_with_empty_mempool_is_noop() {
        let (_dir, chain, _genesis_keys) = chain_fixture();
        let miner = Miner::new(chain.clone(), "d".repeat(30), 30, 10);

        miner.mine_once().await;
        assert_eq!(chain.read().unwrap().len(), 1);
    }
}
