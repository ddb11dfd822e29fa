//! The chain state machine: amounts, transactions, blocks, and the chain
//! with its mempool.

pub mod amount;
pub mod block;
pub mod chain;
pub mod transaction;

pub use amount::Amount;
pub use block::Block;
pub use chain::{BalanceReport, Chain, ChainConfig, ChainEvent, TokenBalance};
pub use transaction::Transaction;
