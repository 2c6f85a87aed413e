//! Record operations

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tracing::debug;

use crate::error::DbError;
use crate::models::{FieldMap, Record};
use crate::repository::Database;
use crate::store::RecordStore;

const RECORD_COLUMNS: &str = "id, model, entity_id, fields, created_at, updated_at";

/// Map a unique-constraint violation to [`DbError::Duplicate`]
fn map_insert_error(e: sqlx::Error, model: &str, entity_id: &str) -> DbError {
    match e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            DbError::Duplicate(format!("{}:{}", model, entity_id))
        }
        other => DbError::Connection(other),
    }
}

impl Database {
    // ==================== Record Operations ====================

    /// Insert a new record
    pub async fn insert_record(
        &self,
        model: &str,
        entity_id: &str,
        fields: &FieldMap,
    ) -> Result<Record, DbError> {
        let now = Utc::now();
        let encoded = serde_json::to_string(fields)?;

        let row = sqlx::query(
            r#"
            INSERT INTO records (model, entity_id, fields, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(model)
        .bind(entity_id)
        .bind(&encoded)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, model, entity_id))?;

        let id: i64 = row.get("id");
        debug!("Created record {}:{} (id {})", model, entity_id, id);

        Ok(Record {
            id,
            model: model.to_string(),
            entity_id: entity_id.to_string(),
            fields: fields.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a record by model and entity id
    pub async fn get_record(&self, model: &str, entity_id: &str) -> Result<Option<Record>, DbError> {
        let query = format!(
            "SELECT {} FROM records WHERE model = ? AND entity_id = ?",
            RECORD_COLUMNS
        );
        let result = sqlx::query(&query)
            .bind(model)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;

        result
            .map(|row| Record::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Merge fields into an existing record.
    ///
    /// Only the given fields are written; other stored fields are kept.
    pub async fn update_record_fields(
        &self,
        model: &str,
        entity_id: &str,
        changes: &FieldMap,
    ) -> Result<Record, DbError> {
        if changes.is_empty() {
            return self
                .get_record(model, entity_id)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("{}:{}", model, entity_id)));
        }

        let now = Utc::now();
        let patch = serde_json::to_string(changes)?;
        let query = format!(
            "UPDATE records SET fields = json_patch(fields, ?), updated_at = ? \
             WHERE model = ? AND entity_id = ? RETURNING {}",
            RECORD_COLUMNS
        );

        let result = sqlx::query(&query)
            .bind(&patch)
            .bind(now.to_rfc3339())
            .bind(model)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;

        match result {
            Some(row) => Ok(Record::try_from(&row)?),
            None => Err(DbError::NotFound(format!("{}:{}", model, entity_id))),
        }
    }

    /// List records of a model, oldest first
    pub async fn list_records(&self, model: &str, limit: i64) -> Result<Vec<Record>, DbError> {
        let query = format!(
            "SELECT {} FROM records WHERE model = ? ORDER BY id ASC LIMIT ?",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(model)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Record::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Count records of a model
    pub async fn count_records(&self, model: &str) -> Result<i64, DbError> {
        let result = sqlx::query("SELECT COUNT(*) as count FROM records WHERE model = ?")
            .bind(model)
            .fetch_one(&self.pool)
            .await?;
        Ok(result.get("count"))
    }
}

/// [`RecordStore`] over one model of a [`Database`]
#[derive(Clone)]
pub struct ModelStore {
    db: Database,
    model: String,
}

impl ModelStore {
    pub fn new(db: Database, model: &str) -> Self {
        Self {
            db,
            model: model.to_string(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl RecordStore for ModelStore {
    fn model(&self) -> &str {
        &self.model
    }

    async fn find_one(&self, entity_id: &str) -> Result<Option<Record>, DbError> {
        self.db.get_record(&self.model, entity_id).await
    }

    async fn create(&self, entity_id: &str, fields: &FieldMap) -> Result<Record, DbError> {
        self.db.insert_record(&self.model, entity_id, fields).await
    }

    async fn update(&self, record: &Record, changes: &FieldMap) -> Result<Record, DbError> {
        self.db
            .update_record_fields(&self.model, &record.entity_id, changes)
            .await
    }
}
