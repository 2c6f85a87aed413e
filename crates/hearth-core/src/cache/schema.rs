//! Field schema for cache nodes
//!
//! Cache entries store every field as a string. The declared [`FieldKind`]
//! decides how a stored string is read back and which values a write accepts.

use hearth_db::FieldValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing a field kind
#[derive(Debug, Clone)]
pub struct ParseFieldKindError(String);

impl fmt::Display for ParseFieldKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid field kind: {}", self.0)
    }
}

impl std::error::Error for ParseFieldKindError {}

/// Declared type of a cached field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Integer if the stored string parses fully as one, otherwise the string
    #[default]
    Inferred,
    Integer,
    String,
    Boolean,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Inferred => "inferred",
            FieldKind::Integer => "integer",
            FieldKind::String => "string",
            FieldKind::Boolean => "boolean",
        }
    }

    /// Whether `increment`/`decrement` may target a field of this kind
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Inferred | FieldKind::Integer)
    }

    /// Decode a stored string. `None` means the string does not hold this kind.
    pub fn decode(&self, raw: &str) -> Option<FieldValue> {
        match self {
            FieldKind::Inferred => Some(match raw.parse::<i64>() {
                Ok(n) => FieldValue::Integer(n),
                Err(_) => FieldValue::Text(raw.to_string()),
            }),
            FieldKind::Integer => raw.parse::<i64>().ok().map(FieldValue::Integer),
            FieldKind::String => Some(FieldValue::Text(raw.to_string())),
            FieldKind::Boolean => parse_bool(raw).map(FieldValue::Boolean),
        }
    }

    /// Convert a value for storage under this kind
    pub fn coerce(&self, value: &FieldValue) -> Option<FieldValue> {
        match (self, value) {
            (FieldKind::Inferred, v) => Some(v.clone()),
            (FieldKind::Integer, FieldValue::Integer(_)) => Some(value.clone()),
            (FieldKind::Integer, FieldValue::Text(s)) => self.decode(s),
            (FieldKind::Integer, FieldValue::Boolean(_)) => None,
            (FieldKind::String, v) => Some(FieldValue::Text(v.to_string())),
            (FieldKind::Boolean, FieldValue::Boolean(_)) => Some(value.clone()),
            (FieldKind::Boolean, FieldValue::Integer(0)) => Some(FieldValue::Boolean(false)),
            (FieldKind::Boolean, FieldValue::Integer(1)) => Some(FieldValue::Boolean(true)),
            (FieldKind::Boolean, FieldValue::Integer(_)) => None,
            (FieldKind::Boolean, FieldValue::Text(s)) => self.decode(s),
        }
    }

    /// Encode a value into its stored form
    pub fn encode(&self, value: &FieldValue) -> Option<String> {
        self.coerce(value).map(|v| v.to_string())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = ParseFieldKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inferred" | "auto" => Ok(FieldKind::Inferred),
            "integer" | "int" => Ok(FieldKind::Integer),
            "string" | "text" => Ok(FieldKind::String),
            "boolean" | "bool" => Ok(FieldKind::Boolean),
            _ => Err(ParseFieldKindError(s.to_string())),
        }
    }
}

/// A declared field of a cache node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self::typed(name, FieldKind::Inferred)
    }

    pub fn typed(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl From<&str> for FieldSpec {
    fn from(name: &str) -> Self {
        FieldSpec::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_inferred_decode() {
        assert_eq!(FieldKind::Inferred.decode("50"), Some(FieldValue::Integer(50)));
        assert_eq!(FieldKind::Inferred.decode("-3"), Some(FieldValue::Integer(-3)));
        assert_eq!(
            FieldKind::Inferred.decode("12abc"),
            Some(FieldValue::Text("12abc".into()))
        );
        assert_eq!(
            FieldKind::Inferred.decode("true"),
            Some(FieldValue::Text("true".into()))
        );
        assert_eq!(FieldKind::Inferred.decode(""), Some(FieldValue::Text(String::new())));
    }

    #[test]
    fn test_typed_decode() {
        assert_eq!(FieldKind::Integer.decode("x"), None);
        assert_eq!(
            FieldKind::String.decode("007"),
            Some(FieldValue::Text("007".into()))
        );
        assert_eq!(FieldKind::Boolean.decode("1"), Some(FieldValue::Boolean(true)));
        assert_eq!(FieldKind::Boolean.decode("false"), Some(FieldValue::Boolean(false)));
        assert_eq!(FieldKind::Boolean.decode("yes"), None);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(
            FieldKind::Integer.coerce(&"42".into()),
            Some(FieldValue::Integer(42))
        );
        assert_eq!(FieldKind::Integer.coerce(&true.into()), None);
        assert_eq!(
            FieldKind::String.coerce(&7.into()),
            Some(FieldValue::Text("7".into()))
        );
        assert_eq!(
            FieldKind::Boolean.coerce(&0.into()),
            Some(FieldValue::Boolean(false))
        );
        assert_eq!(FieldKind::Boolean.coerce(&2.into()), None);
        assert_eq!(FieldKind::Boolean.encode(&"true".into()).as_deref(), Some("true"));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("INT".parse::<FieldKind>().unwrap(), FieldKind::Integer);
        assert_eq!("bool".parse::<FieldKind>().unwrap(), FieldKind::Boolean);
        assert_eq!("text".parse::<FieldKind>().unwrap(), FieldKind::String);
        assert!("float".parse::<FieldKind>().is_err());
    }

    proptest! {
        #[test]
        fn prop_integer_strings_decode_to_integers(n in any::<i64>()) {
            prop_assert_eq!(
                FieldKind::Inferred.decode(&n.to_string()),
                Some(FieldValue::Integer(n))
            );
        }

        #[test]
        fn prop_other_strings_decode_unchanged(s in "[a-zA-Z _:][a-zA-Z0-9 _:-]{0,24}") {
            prop_assert_eq!(
                FieldKind::Inferred.decode(&s),
                Some(FieldValue::Text(s.clone()))
            );
        }
    }
}
