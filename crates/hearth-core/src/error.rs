//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] hearth_db::DbError),

    #[error("Cache tier error: {0}")]
    Tier(#[from] hearth_tier::TierError),

    #[error("Cache tier is not ready")]
    NotReady,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown field '{field}' for cache node '{node}'")]
    UnknownField { node: String, field: String },

    #[error("Field '{field}' does not hold a {expected} value: {value}")]
    InvalidValue {
        field: String,
        expected: &'static str,
        value: String,
    },

    #[error("Invalid entity id '{0}'")]
    InvalidEntityId(String),

    #[error("Sync packet carries no entity id (looked for {0})")]
    MissingIdentifier(String),

    #[error("Invalid cache node definition: {0}")]
    InvalidDefinition(String),

    #[error("Listener failed: {0}")]
    Listener(String),

    #[error("Already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Task failed: {0}")]
    Task(String),
}

impl CoreError {
    /// Whether the failure came from an unavailable cache tier
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            CoreError::NotReady | CoreError::Tier(hearth_tier::TierError::NotReady)
        )
    }
}
