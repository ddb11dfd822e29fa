use crate::core::{Block, Transaction};
use crate::{EmberError, Result};
use serde::{Deserialize, Serialize};

const KNOWN_TYPES: [&str; 4] = [
    "REQUEST_FULL_CHAIN",
    "FULL_CHAIN",
    "NEW_BLOCK",
    "NEW_TRANSACTION",
];

/// The consensus-relevant peer message set, carried as `{type, data}` JSON
/// frames. Dispatch over the variants is exhaustive; frames with unknown
/// types are dropped at decode time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum PeerMessage {
    #[serde(rename = "REQUEST_FULL_CHAIN")]
    RequestFullChain,
    #[serde(rename = "FULL_CHAIN")]
    FullChain(Vec<Block>),
    #[serde(rename = "NEW_BLOCK")]
    NewBlock(Block),
    #[serde(rename = "NEW_TRANSACTION")]
    NewTransaction(Transaction),
}

impl PeerMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one frame. `Ok(None)` means a well-formed frame of an unknown
    /// type, which the protocol ignores; anything unparseable is an error.
    pub fn decode(text: &str) -> Result<Option<PeerMessage>> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| EmberError::Network(format!("Malformed peer frame: {}", e)))?;

        let message_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| EmberError::Network("Peer frame has no type".to_string()))?;

        if !KNOWN_TYPES.contains(&message_type) {
            log::debug!("Ignoring unknown peer message type: {}", message_type);
            return Ok(None);
        }

        let message = serde_json::from_value(value)
            .map_err(|e| EmberError::Network(format!("Invalid {} frame: {}", message_type, e)))?;
        Ok(Some(message))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PeerMessage::RequestFullChain => "REQUEST_FULL_CHAIN",
            PeerMessage::FullChain(_) => "FULL_CHAIN",
            PeerMessage::NewBlock(_) => "NEW_BLOCK",
            PeerMessage::NewTransaction(_) => "NEW_TRANSACTION",
        }
    }
}
