//! Time-driven proof-of-work mining.

pub mod miner;

pub use miner::Miner;
