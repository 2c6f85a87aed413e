//! Database error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("Field encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl DbError {
    /// Whether this error is a uniqueness conflict on insert
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DbError::Duplicate(_))
    }
}
