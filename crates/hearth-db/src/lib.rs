//! Hearth Record Store
//!
//! This crate provides the durable record store behind the cache tier:
//! id-keyed records holding a map of scalar fields, persisted in SQLite
//! via sqlx and exposed through the [`RecordStore`] trait.

pub mod error;
pub mod models;
pub mod repository;
pub mod store;
pub mod utils;

pub use error::DbError;
pub use models::*;
pub use repository::{Database, ModelStore};
pub use store::RecordStore;

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
