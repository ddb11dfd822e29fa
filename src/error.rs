use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmberError>;

#[derive(Error, Debug)]
pub enum EmberError {
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Block error: {0}")]
    Block(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Mining error: {0}")]
    Mining(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("Duplicate token symbol: {0}")]
    DuplicateTokenSymbol(String),

    #[error("Chain inconsistent: {0}")]
    ChainInconsistent(String),
}
