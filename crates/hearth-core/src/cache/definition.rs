//! Cache node definitions

use hearth_db::{FieldMap, FieldValue};
use std::collections::BTreeSet;

use super::policy::TtlPolicy;
use super::schema::{FieldKind, FieldSpec};
use crate::config::CacheSettings;
use crate::error::CoreError;

/// Payload keys searched, in order, for the entity id of a sync event
pub const DEFAULT_IDENTIFIER_KEYS: [&str; 3] = ["entityId", "discordId", "uuid"];

/// Immutable configuration of one cache node
#[derive(Debug, Clone)]
pub struct CacheNodeDefinition {
    name: String,
    fields: Vec<FieldSpec>,
    policy: TtlPolicy,
    defaults: FieldMap,
    sync_events: BTreeSet<String>,
    identifier_keys: Vec<String>,
}

impl CacheNodeDefinition {
    pub fn builder(name: impl Into<String>) -> CacheNodeDefinitionBuilder {
        CacheNodeDefinitionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn defaults(&self) -> &FieldMap {
        &self.defaults
    }

    pub fn sync_events(&self) -> &BTreeSet<String> {
        &self.sync_events
    }

    pub fn handles_event(&self, kind: &str) -> bool {
        self.sync_events.contains(kind)
    }

    pub fn identifier_keys(&self) -> &[String] {
        &self.identifier_keys
    }
}

/// Builder for [`CacheNodeDefinition`]
#[derive(Debug, Clone)]
pub struct CacheNodeDefinitionBuilder {
    name: String,
    fields: Vec<FieldSpec>,
    policy: TtlPolicy,
    defaults: FieldMap,
    sync_events: BTreeSet<String>,
    identifier_keys: Option<Vec<String>>,
}

impl CacheNodeDefinitionBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            policy: TtlPolicy::default(),
            defaults: FieldMap::new(),
            sync_events: BTreeSet::new(),
            identifier_keys: None,
        }
    }

    /// Declare a field whose type is inferred when read
    pub fn field(self, name: impl Into<String>) -> Self {
        self.typed_field(name, FieldKind::Inferred)
    }

    pub fn typed_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec::typed(name, kind));
        self
    }

    pub fn fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldSpec>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Take all lifetimes from the shared settings
    pub fn settings(mut self, settings: &CacheSettings) -> Self {
        self.policy = TtlPolicy::from(settings);
        self
    }

    pub fn ttl(mut self, secs: u64) -> Self {
        self.policy.ttl = secs;
        self
    }

    pub fn active_ttl(mut self, secs: u64) -> Self {
        self.policy.active_ttl = secs;
        self
    }

    pub fn inactive_threshold(mut self, secs: u64) -> Self {
        self.policy.inactive_threshold = secs;
        self
    }

    pub fn default_value(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }

    pub fn sync_event(mut self, kind: impl Into<String>) -> Self {
        self.sync_events.insert(kind.into());
        self
    }

    pub fn identifier_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifier_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Validate and build the definition
    pub fn build(self) -> Result<CacheNodeDefinition, CoreError> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid_name {
            return Err(CoreError::InvalidDefinition(format!(
                "node name '{}' must be non-empty and use only [A-Za-z0-9_.-]",
                self.name
            )));
        }
        if self.fields.is_empty() {
            return Err(CoreError::InvalidDefinition(format!(
                "node '{}' declares no fields",
                self.name
            )));
        }

        for (setting, value) in [
            ("ttl", self.policy.ttl),
            ("active_ttl", self.policy.active_ttl),
            ("inactive_threshold", self.policy.inactive_threshold),
        ] {
            if value == 0 {
                return Err(CoreError::InvalidDefinition(format!(
                    "node '{}' sets {} to 0; lifetimes must be at least 1 second",
                    self.name, setting
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for spec in &self.fields {
            if spec.name.is_empty() || !seen.insert(spec.name.as_str()) {
                return Err(CoreError::InvalidDefinition(format!(
                    "node '{}' declares field '{}' more than once or unnamed",
                    self.name, spec.name
                )));
            }
        }

        let mut defaults = FieldMap::new();
        for (field, value) in &self.defaults {
            let spec = self
                .fields
                .iter()
                .find(|f| &f.name == field)
                .ok_or_else(|| CoreError::UnknownField {
                    node: self.name.clone(),
                    field: field.clone(),
                })?;
            let coerced = spec.kind.coerce(value).ok_or_else(|| CoreError::InvalidValue {
                field: field.clone(),
                expected: spec.kind.as_str(),
                value: value.to_string(),
            })?;
            defaults.insert(field.clone(), coerced);
        }

        let identifier_keys = self
            .identifier_keys
            .filter(|keys| !keys.is_empty())
            .unwrap_or_else(|| DEFAULT_IDENTIFIER_KEYS.iter().map(|k| k.to_string()).collect());

        Ok(CacheNodeDefinition {
            name: self.name,
            fields: self.fields,
            policy: self.policy,
            defaults,
            sync_events: self.sync_events,
            identifier_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build() {
        let def = CacheNodeDefinition::builder("profile")
            .fields(["coins", "level"])
            .typed_field("vip", FieldKind::Boolean)
            .ttl(60)
            .active_ttl(300)
            .inactive_threshold(120)
            .default_value("coins", 0)
            .default_value("vip", 0)
            .sync_event("coins_update")
            .build()
            .unwrap();

        assert_eq!(def.name(), "profile");
        assert_eq!(def.fields().len(), 3);
        assert_eq!(def.field("vip").unwrap().kind, FieldKind::Boolean);
        assert_eq!(def.policy().expiry_for(true), 300);
        assert_eq!(def.defaults()["vip"], FieldValue::Boolean(false));
        assert!(def.handles_event("coins_update"));
        assert!(!def.handles_event("level_update"));
        assert_eq!(def.identifier_keys(), ["entityId", "discordId", "uuid"]);
    }

    #[test]
    fn test_default_for_unknown_field() {
        let err = CacheNodeDefinition::builder("profile")
            .field("coins")
            .default_value("gems", 5)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownField { .. }));
    }

    #[test]
    fn test_default_of_wrong_kind() {
        let err = CacheNodeDefinition::builder("profile")
            .typed_field("coins", FieldKind::Integer)
            .default_value("coins", "lots")
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue { .. }));
    }

    #[test]
    fn test_invalid_names() {
        assert!(CacheNodeDefinition::builder("").field("a").build().is_err());
        assert!(CacheNodeDefinition::builder("a:b").field("a").build().is_err());
        assert!(CacheNodeDefinition::builder("a*").field("a").build().is_err());
        assert!(CacheNodeDefinition::builder("p").build().is_err());
        assert!(
            CacheNodeDefinition::builder("p")
                .fields(["a", "a"])
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_zero_lifetimes_rejected() {
        let err = CacheNodeDefinition::builder("profile")
            .field("coins")
            .ttl(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidDefinition(_)));

        assert!(
            CacheNodeDefinition::builder("profile")
                .field("coins")
                .active_ttl(0)
                .build()
                .is_err()
        );
        assert!(
            CacheNodeDefinition::builder("profile")
                .field("coins")
                .inactive_threshold(0)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_custom_identifier_keys() {
        let def = CacheNodeDefinition::builder("stats")
            .field("wins")
            .identifier_keys(["playerId"])
            .build()
            .unwrap();
        assert_eq!(def.identifier_keys(), ["playerId"]);
    }
}
