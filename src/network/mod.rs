//! Peer-to-peer networking: WebSocket transport and the message protocol.

pub mod peer;
pub mod protocol;

pub use peer::PeerHub;
pub use protocol::PeerMessage;
