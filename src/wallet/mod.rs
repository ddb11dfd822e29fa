//! Key-file wallets.

pub mod wallet;

pub use wallet::{create_wallet, list_wallets, load_wallet, WalletFile};
