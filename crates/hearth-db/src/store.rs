//! Record store trait

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{FieldMap, Record};

/// Id-keyed record store for one model
///
/// `create` must reject a second record for the same entity id with
/// [`DbError::Duplicate`], so that racing first-time creations can be told
/// apart from genuine failures.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Model (table namespace) this store addresses
    fn model(&self) -> &str;

    /// Find the record for an entity
    async fn find_one(&self, entity_id: &str) -> Result<Option<Record>, DbError>;

    /// Create a record for an entity
    async fn create(&self, entity_id: &str, fields: &FieldMap) -> Result<Record, DbError>;

    /// Merge `changes` into an existing record
    async fn update(&self, record: &Record, changes: &FieldMap) -> Result<Record, DbError>;
}
