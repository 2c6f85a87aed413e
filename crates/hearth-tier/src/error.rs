//! Cache tier error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TierError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache tier is not ready")]
    NotReady,

    #[error("Connection failed after {attempts} attempts: {reason}")]
    ConnectFailed { attempts: u32, reason: String },

    #[error("Wrong value type at {key}: {reason}")]
    WrongType { key: String, reason: String },

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Packet codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
