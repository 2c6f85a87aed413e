//! Database models

use crate::utils::parse_datetime_or_now;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use std::collections::BTreeMap;
use std::fmt;

/// A scalar field value held by a record or a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Boolean(bool),
    Text(String),
}

/// Field name to value mapping, ordered by field name
pub type FieldMap = BTreeMap<String, FieldValue>;

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Integer(_) => "integer",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Text(_) => "string",
        }
    }

    /// Convert a JSON scalar; objects, arrays and null have no field form.
    /// Non-integral numbers are kept as their textual form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(FieldValue::Boolean(*b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Text(n.to_string()),
            }),
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Integer(n) => Value::from(*n),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }
}

/// The cache wire form: integers in decimal, booleans as `true`/`false`,
/// text verbatim
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(value as i64)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// A durable record: one entity of one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub model: String,
    pub entity_id: String,
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Fields of `changes` whose value differs from the stored one
    pub fn diff(&self, changes: &FieldMap) -> FieldMap {
        changes
            .iter()
            .filter(|(name, value)| self.fields.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for Record {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let raw_fields: String = row.try_get("fields")?;
        let fields: FieldMap =
            serde_json::from_str(&raw_fields).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Record {
            id: row.try_get("id")?,
            model: row.try_get("model")?,
            entity_id: row.try_get("entity_id")?,
            fields,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
            updated_at: parse_datetime_or_now(&row.try_get::<String, _>("updated_at")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_value_json_shape() {
        let mut fields = FieldMap::new();
        fields.insert("coins".to_string(), 50.into());
        fields.insert("name".to_string(), "007".into());
        fields.insert("vip".to_string(), true.into());

        let encoded = serde_json::to_string(&fields).unwrap();
        assert_eq!(encoded, r#"{"coins":50,"name":"007","vip":true}"#);

        let decoded: FieldMap = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, fields);
    }

    #[test]
    fn test_from_json_scalars_only() {
        assert_eq!(FieldValue::from_json(&json!(3)), Some(FieldValue::Integer(3)));
        assert_eq!(FieldValue::from_json(&json!(1.5)), Some(FieldValue::Text("1.5".into())));
        assert_eq!(FieldValue::from_json(&json!(false)), Some(FieldValue::Boolean(false)));
        assert_eq!(FieldValue::from_json(&json!(null)), None);
        assert_eq!(FieldValue::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn test_display_is_cache_wire_form() {
        assert_eq!(FieldValue::Integer(-4).to_string(), "-4");
        assert_eq!(FieldValue::Boolean(true).to_string(), "true");
        assert_eq!(FieldValue::Text("hi there".into()).to_string(), "hi there");
    }

    #[test]
    fn test_diff_reports_only_changed_fields() {
        let mut fields = FieldMap::new();
        fields.insert("coins".to_string(), 10.into());
        fields.insert("level".to_string(), 1.into());
        let record = Record {
            id: 1,
            model: "profile".to_string(),
            entity_id: "u1".to_string(),
            fields,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let mut changes = FieldMap::new();
        changes.insert("coins".to_string(), 10.into());
        changes.insert("level".to_string(), 2.into());
        changes.insert("title".to_string(), "rookie".into());

        let diff = record.diff(&changes);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff["level"], FieldValue::Integer(2));
        assert_eq!(diff["title"], FieldValue::Text("rookie".into()));
    }
}
