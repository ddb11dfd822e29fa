use crate::core::{Block, Chain, ChainEvent, Transaction};
use crate::network::protocol::PeerMessage;
use crate::Result;
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};

struct Peer {
    sender: mpsc::UnboundedSender<WsMessage>,
    alive: Arc<AtomicBool>,
}

/// The peer layer: a WebSocket listener plus outbound dials, a per-peer
/// writer task, heartbeat supervision, and the message handlers that drive
/// chain sync, block propagation and transaction gossip.
pub struct PeerHub {
    chain: Arc<RwLock<Chain>>,
    peers: Mutex<HashMap<u64, Peer>>,
    next_peer_id: AtomicU64,
    processed_transactions: Mutex<HashSet<String>>,
    last_processed_block_hash: Mutex<Option<String>>,
    heartbeat_secs: u64,
}

impl PeerHub {
    pub fn new(chain: Arc<RwLock<Chain>>, heartbeat_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            chain,
            peers: Mutex::new(HashMap::new()),
            next_peer_id: AtomicU64::new(1),
            processed_transactions: Mutex::new(HashSet::new()),
            last_processed_block_hash: Mutex::new(None),
            heartbeat_secs,
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Bind the peer listener. Returns the actual bound port (useful when
    /// asked for port 0) and serves connections until the process exits.
    pub async fn listen(self: &Arc<Self>, port: u16) -> Result<u16> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let bound = listener.local_addr()?.port();
        log::info!("Peer listener on port {}", bound);

        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        log::info!("Inbound peer connection from {}", addr);
                        let hub = hub.clone();
                        tokio::spawn(async move {
                            match accept_async(stream).await {
                                Ok(ws) => hub.run_peer(ws).await,
                                Err(e) => log::warn!("WebSocket handshake failed: {}", e),
                            }
                        });
                    }
                    Err(e) => {
                        log::warn!("Failed to accept peer connection: {}", e);
                    }
                }
            }
        });
        Ok(bound)
    }

    /// Dial one configured peer; a failed dial is logged and dropped.
    pub async fn connect(self: &Arc<Self>, url: &str) {
        match connect_async(url).await {
            Ok((ws, _)) => {
                log::info!("Connected to peer {}", url);
                let hub = self.clone();
                tokio::spawn(async move { hub.run_peer(ws).await });
            }
            Err(e) => {
                log::warn!("Failed to connect to peer {}: {}", url, e);
            }
        }
    }

    /// Forward chain events to the peer set, excluding the peer a block or
    /// transaction came from.
    pub fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = self.clone();
        let mut events = hub
            .chain
            .read()
            .unwrap()
            .subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChainEvent::TransactionAdmitted {
                        transaction,
                        origin,
                    }) => {
                        hub.mark_transaction_processed(&transaction.hash);
                        hub.broadcast(&PeerMessage::NewTransaction(transaction), origin);
                    }
                    Ok(ChainEvent::BlockAppended { block, origin }) => {
                        *hub
                            .last_processed_block_hash
                            .lock()
                            .unwrap() = Some(block.hash.clone());
                        hub.broadcast(&PeerMessage::NewBlock(block), origin);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Peer event pump lagged, skipped {} events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Ping every peer on an interval; a peer that did not answer between
    /// consecutive pings is terminated.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(hub.heartbeat_secs));
            interval.tick().await;

            loop {
                interval.tick().await;
                let mut dead = Vec::new();
                {
                    let peers = hub.peers.lock().unwrap();
                    for (id, peer) in peers.iter() {
                        if !peer.alive.swap(false, Ordering::SeqCst) {
                            dead.push(*id);
                        } else {
                            let _ = peer.sender.send(WsMessage::Ping(Vec::new()));
                        }
                    }
                }
                for id in dead {
                    log::warn!("Peer {} missed heartbeat, terminating", id);
                    hub.drop_peer(id);
                }
            }
        })
    }

    pub fn broadcast(&self, message: &PeerMessage, except: Option<u64>) {
        let encoded = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {} frame: {}", message.type_name(), e);
                return;
            }
        };

        let peers = self.peers.lock().unwrap();
        for (id, peer) in peers.iter() {
            if Some(*id) == except {
                continue;
            }
            let _ = peer.sender.send(WsMessage::Text(encoded.clone()));
        }
    }

    fn send_to(&self, peer_id: u64, message: &PeerMessage) {
        let encoded = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {} frame: {}", message.type_name(), e);
                return;
            }
        };
        if let Some(peer) = self
            .peers
            .lock()
            .unwrap()
            .get(&peer_id)
        {
            let _ = peer.sender.send(WsMessage::Text(encoded));
        }
    }

    fn drop_peer(&self, peer_id: u64) {
        if let Some(peer) = self
            .peers
            .lock()
            .unwrap()
            .remove(&peer_id)
        {
            let _ = peer.sender.send(WsMessage::Close(None));
        }
    }

    fn mark_transaction_processed(&self, hash: &str) {
        self.processed_transactions
            .lock()
            .unwrap()
            .insert(hash.to_string());
    }

    async fn run_peer<S>(self: Arc<Self>, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let peer_id = self.next_peer_id.fetch_add(1, Ordering::SeqCst);
        let (mut sink, mut stream) = ws.split();
        let (sender, mut outbox) = mpsc::unbounded_channel::<WsMessage>();
        let alive = Arc::new(AtomicBool::new(true));

        self.peers.lock().unwrap().insert(
            peer_id,
            Peer {
                sender: sender.clone(),
                alive: alive.clone(),
            },
        );

        let writer = tokio::spawn(async move {
            while let Some(message) = outbox.recv().await {
                let closing = matches!(message, WsMessage::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        // Sync first: every fresh connection asks for the peer's chain.
        self.send_to(peer_id, &PeerMessage::RequestFullChain);

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    alive.store(true, Ordering::SeqCst);
                    self.handle_frame(peer_id, &text);
                }
                Ok(WsMessage::Ping(payload)) => {
                    let _ = sender.send(WsMessage::Pong(payload));
                }
                Ok(WsMessage::Pong(_)) => {
                    alive.store(true, Ordering::SeqCst);
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Peer {} socket error: {}", peer_id, e);
                    break;
                }
            }
        }

        self.peers
            .lock()
            .unwrap()
            .remove(&peer_id);
        drop(sender);
        let _ = writer.await;
        log::info!("Peer {} disconnected", peer_id);
    }

    fn handle_frame(&self, peer_id: u64, text: &str) {
        let message = match PeerMessage::decode(text) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                log::warn!("Dropping frame from peer {}: {}", peer_id, e);
                return;
            }
        };
        log::debug!("Peer {} sent {}", peer_id, message.type_name());

        match message {
            PeerMessage::RequestFullChain => {
                let blocks = self
                    .chain
                    .read()
                    .unwrap()
                    .blocks()
                    .to_vec();
                self.send_to(peer_id, &PeerMessage::FullChain(blocks));
            }
            PeerMessage::FullChain(blocks) => {
                let result = self
                    .chain
                    .write()
                    .unwrap()
                    .replace_chain(blocks);
                match result {
                    Ok(true) => log::info!("Adopted full chain from peer {}", peer_id),
                    Ok(false) => log::debug!("Kept local chain over peer {}'s", peer_id),
                    Err(e) => log::warn!("Rejected full chain from peer {}: {}", peer_id, e),
                }
            }
            PeerMessage::NewBlock(block) => self.handle_new_block(peer_id, block),
            PeerMessage::NewTransaction(tx) => self.handle_new_transaction(peer_id, tx),
        }
    }

    fn handle_new_block(&self, peer_id: u64, mut block: Block) {
        {
            let last = self
                .last_processed_block_hash
                .lock()
                .unwrap();
            if last.as_deref() == Some(block.hash.as_str()) {
                return;
            }
        }

        let already_in_memory = self
            .chain
            .read()
            .unwrap()
            .contains_block(&block.hash);
        if already_in_memory {
            return;
        }

        // Validated and persisted once before (e.g. just prior to a
        // restart): re-attach from the store without re-running consensus.
        let stored = {
            let chain = self.chain.read().unwrap();
            let store = chain.store().clone();
            match store.has_block(&block.hash) {
                Ok(true) => store.block_by_hash(&block.hash).ok().flatten(),
                _ => None,
            }
        };
        if let Some(known) = stored {
            self.chain
                .write()
                .unwrap()
                .append_known_block(known);
            self.note_block_processed(&block.hash);
            return;
        }

        // Token creations must precede the transfers that reference them.
        let (mut reordered, regular): (Vec<Transaction>, Vec<Transaction>) = block
            .transactions
            .drain(..)
            .partition(|tx| tx.is_token_creation());
        reordered.extend(regular);
        block.transactions = reordered;

        let result = self
            .chain
            .write()
            .unwrap()
            .add_block(block.clone(), Some(peer_id));
        match result {
            Ok(()) => {
                self.note_block_processed(&block.hash);
            }
            Err(e) => {
                log::warn!(
                    "Rejected block {} from peer {}: {}; requesting full chain",
                    block.index,
                    peer_id,
                    e
                );
                self.send_to(peer_id, &PeerMessage::RequestFullChain);
            }
        }
    }

    fn handle_new_transaction(&self, peer_id: u64, tx: Transaction) {
        {
            let mut processed = self
                .processed_transactions
                .lock()
                .unwrap();
            if !processed.insert(tx.hash.clone()) {
                return;
            }
        }

        let result = self
            .chain
            .write()
            .unwrap()
            .add_pending_transaction(tx, Some(peer_id));
        match result {
            Ok(true) => {}
            Ok(false) => log::debug!("Transaction from peer {} already pending", peer_id),
            Err(e) => log::warn!("Rejected transaction from peer {}: {}", peer_id, e),
        }
    }

    fn note_block_processed(&self, hash: &str) {
        *self
            .last_processed_block_hash
            .lock()
            .unwrap() = Some(hash.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Amount, ChainConfig};
    use crate::crypto::keys::KeyPair;
    use crate::storage::Store;
    use tempfile::TempDir;

    fn node(
        genesis_keys: &KeyPair,
        expect_peers: bool,
    ) -> (TempDir, Arc<RwLock<Chain>>, Arc<PeerHub>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path().join("state")).unwrap());
        let config = ChainConfig {
            difficulty: 1,
            mining_reward: Amount::from_whole(100),
            genesis_supply: Amount::from_whole(1_000_000),
            genesis_address: genesis_keys.address(),
            miner_address: "d".repeat(30),
        };
        let chain = Arc::new(RwLock::new(
            Chain::init(config, store, expect_peers).unwrap(),
        ));
        let hub = PeerHub::new(chain.clone(), 30);
        hub.spawn_event_pump();
        (dir, chain, hub)
    }

    async fn settle<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_fresh_node_syncs_full_chain() {
        let genesis_keys = KeyPair::generate();
        let (_dir_a, chain_a, hub_a) = node(&genesis_keys, false);
        let (_dir_b, chain_b, hub_b) = node(&genesis_keys, true);

        assert_eq!(chain_a.read().unwrap().len(), 1);
        assert_eq!(chain_b.read().unwrap().len(), 0);

        let port = hub_a.listen(0).await.unwrap();
        hub_b.connect(&format!("ws://127.0.0.1:{}", port)).await;

        let chain = chain_b.clone();
        settle(move || chain.read().unwrap().len() == 1).await;

        assert_eq!(
            chain_b.read().unwrap().last_block().unwrap().hash,
            chain_a.read().unwrap().last_block().unwrap().hash
        );
        assert_eq!(hub_a.peer_count(), 1);
        assert_eq!(hub_b.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_transaction_gossip_and_block_propagation() {
        let genesis_keys = KeyPair::generate();
        let (_dir_a, chain_a, hub_a) = node(&genesis_keys, false);
        let (_dir_b, chain_b, hub_b) = node(&genesis_keys, true);

        let port = hub_a.listen(0).await.unwrap();
        hub_b.connect(&format!("ws://127.0.0.1:{}", port)).await;
        {
            let chain = chain_b.clone();
            settle(move || chain.read().unwrap().len() == 1).await;
        }

        // A locally admitted transaction reaches the other node's mempool.
        let mut tx = Transaction::new_transfer(
            genesis_keys.address(),
            "a".repeat(30),
            Amount::from_whole(10),
            None,
            None,
            chrono::Utc::now().timestamp_millis(),
        );
        tx.sign(&genesis_keys.private_key).unwrap();
        chain_a
            .write()
            .unwrap()
            .add_pending_transaction(tx, None)
            .unwrap();

        {
            let chain = chain_b.clone();
            settle(move || chain.read().unwrap().has_pending()).await;
        }

        // Mining on A propagates the block; B clears its mempool.
        chain_a
            .write()
            .unwrap()
            .mine_pending_transactions(&"d".repeat(30))
            .unwrap()
            .unwrap();

        {
            let chain = chain_b.clone();
            settle(move || chain.read().unwrap().len() == 2).await;
        }
        assert!(!chain_b.read().unwrap().has_pending());
        assert_eq!(
            chain_b
                .read()
                .unwrap()
                .get_balance_of_address(&"a".repeat(30))
                .unwrap()
                .native,
            Amount::from_whole(10)
        );
    }
}
