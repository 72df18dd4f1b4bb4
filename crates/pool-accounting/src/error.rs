use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Database error: {0}")]
    Database(#[from] redis::RedisError),

    #[error("Miner not found: {0}")]
    InvalidMiner(String),

    #[error("Invalid share: {0}")]
    InvalidShare(String),

    #[error("Unknown reward algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("No reward-eligible shares in window {0}")]
    EmptyWindow(u64),

    #[error("Chain oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("No confirmed balance for miner {0}")]
    NoConfirmedBalance(String),

    #[error("Window not found: {0}")]
    WindowNotFound(u64),

    #[error("Balance entry not found: {0}")]
    BalanceNotFound(String),

    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PoolError>;
