//! Bus packet envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TierError;

/// The `{type, data}` envelope exchanged on the bridge channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPacket {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl SyncPacket {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Serialize the packet to its JSON wire form
    pub fn encode(&self) -> Result<String, TierError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a packet from its JSON wire form
    pub fn decode(payload: &str) -> Result<Self, TierError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Entity identifier carried in `data`, using the first key that is present
    pub fn entity_id<S: AsRef<str>>(&self, keys: &[S]) -> Option<String> {
        entity_id(&self.data, keys)
    }
}

/// Extract an entity identifier from a payload object.
///
/// String and integer identifiers are accepted; empty strings are ignored.
pub fn entity_id<S: AsRef<str>>(data: &Value, keys: &[S]) -> Option<String> {
    let object = data.as_object()?;
    keys.iter().find_map(|key| match object.get(key.as_ref())? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    })
}
