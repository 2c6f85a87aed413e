//! Cache node implementation
//!
//! A node fronts one model of the record store with hash entries in the cache
//! tier. Entries live under `cache:<name>:<id>`; the access marker that decides
//! whether an entity is active lives under `cache:<name>:lastaccess:<id>`.

use hearth_db::{DbError, FieldMap, FieldValue, Record, RecordStore};
use hearth_tier::packet::entity_id;
use hearth_tier::{CacheTier, Clock, SystemClock, WriteMode};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::definition::CacheNodeDefinition;
use super::policy::TtlPolicy;
use crate::error::CoreError;
use crate::report::{Report, ReportKind, Reporter, TracingReporter};

const MARKER_SEGMENT: &str = "lastaccess";

/// Snapshot of a node's in-process counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries populated from the record store
    pub hydrations: u64,
    pub records_created: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    hydrations: AtomicU64,
    records_created: AtomicU64,
}

/// Outcome of one flush sweep over a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Entries written back or confirmed unchanged
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Entries removed from the cache tier after the flush
    pub evicted: u64,
    pub failed: u64,
}

impl SyncReport {
    /// Records created or updated
    pub fn changed(&self) -> u64 {
        self.created + self.updated
    }
}

enum Persisted {
    Created,
    Updated,
    Unchanged,
}

struct EntryOutcome {
    persisted: Persisted,
    evicted: bool,
}

/// Cache-aside unit for one entity type
pub struct CacheNode {
    definition: CacheNodeDefinition,
    namespace: String,
    tier: Arc<dyn CacheTier>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn Reporter>,
    stats: StatCounters,
}

impl CacheNode {
    /// Create a new cache node
    pub fn new(
        definition: CacheNodeDefinition,
        tier: Arc<dyn CacheTier>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let policy = definition.policy();
        info!(
            "Initializing cache node '{}' (fields: {}, ttl: {}s, active ttl: {}s, inactive after: {}s)",
            definition.name(),
            definition.fields().len(),
            policy.ttl,
            policy.active_ttl,
            policy.inactive_threshold
        );

        Self {
            namespace: format!("cache:{}", definition.name()),
            definition,
            tier,
            store,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(TracingReporter),
            stats: StatCounters::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &CacheNodeDefinition {
        &self.definition
    }

    pub fn entry_key(&self, id: &str) -> String {
        format!("{}:{}", self.namespace, id)
    }

    pub fn marker_key(&self, id: &str) -> String {
        format!("{}:{}:{}", self.namespace, MARKER_SEGMENT, id)
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            hydrations: self.stats.hydrations.load(Ordering::Relaxed),
            records_created: self.stats.records_created.load(Ordering::Relaxed),
        }
    }

    // ==================== Public Operations ====================

    /// Read an entity, hydrating it from the record store on a miss.
    ///
    /// Returns `None` only when the cache tier is unavailable or the read
    /// failed; the failure is reported.
    pub async fn get(&self, id: &str) -> Option<FieldMap> {
        match self.try_get(id).await {
            Ok(data) => Some(data),
            Err(e) => {
                self.report("get", Some(id), &e);
                None
            }
        }
    }

    /// Write the declared fields of `data` in one atomic batch
    pub async fn set(&self, id: &str, data: &FieldMap, expires_in: Option<u64>) -> bool {
        let result = async {
            self.ensure_ready()?;
            self.check_id(id)?;
            self.write_fields(id, data, WriteMode::Overwrite, expires_in)
                .await
        }
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                self.report("set", Some(id), &e);
                false
            }
        }
    }

    /// Atomically add `amount` to a numeric field
    pub async fn increment(&self, id: &str, field: &str, amount: i64) -> bool {
        match self.try_increment(id, field, amount).await {
            Ok(value) => {
                debug!("{}:{} {} -> {}", self.name(), id, field, value);
                true
            }
            Err(e) => {
                self.report("increment", Some(id), &e);
                false
            }
        }
    }

    /// Atomically subtract `amount` from a numeric field
    pub async fn decrement(&self, id: &str, field: &str, amount: i64) -> bool {
        match self.try_increment(id, field, amount.saturating_neg()).await {
            Ok(_) => true,
            Err(e) => {
                self.report("decrement", Some(id), &e);
                false
            }
        }
    }

    /// Overwrite one field of a hydrated entry
    pub async fn update(&self, id: &str, field: &str, value: impl Into<FieldValue>) -> bool {
        match self.try_update(id, field, value.into()).await {
            Ok(()) => true,
            Err(e) => {
                self.report("update", Some(id), &e);
                false
            }
        }
    }

    /// Overwrite several fields of a hydrated entry. Undeclared fields are skipped.
    pub async fn bulk_update(&self, id: &str, updates: &FieldMap) -> bool {
        let result = async {
            self.try_get(id).await?;
            self.write_fields(id, updates, WriteMode::Overwrite, None)
                .await
        }
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                self.report("bulk_update", Some(id), &e);
                false
            }
        }
    }

    /// Remove an entry and its access marker
    pub async fn delete(&self, id: &str) -> bool {
        let result = async {
            self.ensure_ready()?;
            self.check_id(id)?;
            let keys = [self.entry_key(id), self.marker_key(id)];
            Ok::<_, CoreError>(self.tier.delete(&keys).await?)
        }
        .await;

        match result {
            Ok(removed) => {
                debug!("Deleted {} keys for {}:{}", removed, self.name(), id);
                true
            }
            Err(e) => {
                self.report("delete", Some(id), &e);
                false
            }
        }
    }

    /// Whether the entity was accessed within the inactivity threshold
    pub async fn is_active(&self, id: &str) -> bool {
        let result = async {
            self.ensure_ready()?;
            self.check_id(id)?;
            let marker = self.tier.get(&self.marker_key(id)).await?;
            Ok::<_, CoreError>(self.active_from(marker.as_deref()))
        }
        .await;

        result.unwrap_or_else(|e| {
            self.report("is_active", Some(id), &e);
            false
        })
    }

    /// Entry keys currently held by this node, marker keys excluded
    pub async fn keys(&self) -> Vec<String> {
        match self.try_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                self.report("keys", None, &e);
                Vec::new()
            }
        }
    }

    /// Flush every cached entry to the record store, evicting idle ones.
    ///
    /// A failing entry is reported and counted; the sweep carries on.
    pub async fn sync_to_database(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let keys = match self.try_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                self.report("sync_to_database", None, &e);
                return report;
            }
        };

        for key in keys {
            let Some(id) = self.entity_of(&key) else {
                continue;
            };

            match self.sync_entry(id).await {
                Ok(None) => {}
                Ok(Some(outcome)) => {
                    report.processed += 1;
                    match outcome.persisted {
                        Persisted::Created => report.created += 1,
                        Persisted::Updated => report.updated += 1,
                        Persisted::Unchanged => report.unchanged += 1,
                    }
                    if outcome.evicted {
                        report.evicted += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    let kind = if e.is_not_ready() {
                        ReportKind::NotReady
                    } else {
                        ReportKind::Sync
                    };
                    self.reporter.report(Report::new(
                        kind,
                        self.context("sync_to_database", Some(id)),
                        e.to_string(),
                    ));
                }
            }
        }

        metrics::counter!("hearth_sync_entries_total", "node" => self.name().to_string())
            .increment(report.processed);
        metrics::counter!("hearth_sync_evictions_total", "node" => self.name().to_string())
            .increment(report.evicted);
        metrics::counter!("hearth_sync_errors_total", "node" => self.name().to_string())
            .increment(report.failed);

        if report.processed > 0 || report.failed > 0 {
            info!(
                "Synced node '{}': {} processed ({} created, {} updated), {} evicted, {} failed",
                self.name(),
                report.processed,
                report.created,
                report.updated,
                report.evicted,
                report.failed
            );
        }

        report
    }

    /// Merge an external event into the cache. Returns whether it was applied.
    ///
    /// Events of a type this node does not declare are ignored. An event with
    /// no declared fields still counts as an access to its entity. The record
    /// store is left alone; the next sweep persists the change.
    pub async fn handle_sync_event(&self, kind: &str, data: &Value) -> bool {
        if !self.definition.handles_event(kind) {
            return false;
        }

        let Some(id) = entity_id(data, self.definition.identifier_keys()) else {
            self.report(
                "handle_sync_event",
                None,
                &CoreError::MissingIdentifier(self.definition.identifier_keys().join(", ")),
            );
            return false;
        };

        let fields: FieldMap = data
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter(|(name, _)| self.definition.field(name).is_some())
                    .filter_map(|(name, value)| {
                        FieldValue::from_json(value).map(|v| (name.clone(), v))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if fields.is_empty() {
            debug!(
                "Event '{}' carries no fields for node '{}', refreshing {} only",
                kind,
                self.name(),
                id
            );
        } else {
            debug!(
                "Applying event '{}' to {}:{} ({} fields)",
                kind,
                self.name(),
                id,
                fields.len()
            );
        }
        self.set(&id, &fields, None).await
    }

    // ==================== Internals ====================

    fn policy(&self) -> &TtlPolicy {
        self.definition.policy()
    }

    fn ensure_ready(&self) -> Result<(), CoreError> {
        if self.tier.is_ready() {
            Ok(())
        } else {
            Err(CoreError::NotReady)
        }
    }

    /// Ids under the marker segment would alias another entity's marker key
    fn check_id(&self, id: &str) -> Result<(), CoreError> {
        let aliases_marker = id
            .strip_prefix(MARKER_SEGMENT)
            .is_some_and(|rest| rest.starts_with(':'));
        if id.is_empty() || aliases_marker {
            return Err(CoreError::InvalidEntityId(id.to_string()));
        }
        Ok(())
    }

    fn context(&self, operation: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}.{}({})", self.name(), operation, id),
            None => format!("{}.{}", self.name(), operation),
        }
    }

    fn report(&self, operation: &str, id: Option<&str>, err: &CoreError) {
        self.reporter
            .report(Report::from_error(self.context(operation, id), err));
    }

    fn active_from(&self, marker: Option<&str>) -> bool {
        let last_access = marker.and_then(|v| v.parse::<i64>().ok());
        self.policy()
            .is_active(last_access, self.clock.now_millis())
    }

    /// Entity id of an entry key, `None` for marker keys and foreign keys
    fn entity_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        let id = key
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix(':')?;
        self.check_id(id).ok()?;
        Some(id)
    }

    async fn try_keys(&self) -> Result<Vec<String>, CoreError> {
        self.ensure_ready()?;
        let keys = self.tier.keys(&format!("{}:*", self.namespace)).await?;
        Ok(keys
            .into_iter()
            .filter(|key| self.entity_of(key).is_some())
            .collect())
    }

    /// Rewrite the access marker, then read back whether the entity is active
    async fn touch(&self, id: &str) -> Result<bool, CoreError> {
        let marker_key = self.marker_key(id);
        let now = self.clock.now_millis().to_string();
        self.tier
            .set_ex(&marker_key, &now, self.policy().active_ttl)
            .await?;

        let marker = self.tier.get(&marker_key).await?;
        Ok(self.active_from(marker.as_deref()))
    }

    fn decode_entry(&self, id: &str, raw: &HashMap<String, String>) -> FieldMap {
        let mut data = FieldMap::new();
        for spec in self.definition.fields() {
            let Some(value) = raw.get(&spec.name) else {
                continue;
            };
            match spec.kind.decode(value) {
                Some(decoded) => {
                    data.insert(spec.name.clone(), decoded);
                }
                None => warn!(
                    "Cached {}:{} field '{}' is not a valid {}: {:?}",
                    self.name(),
                    id,
                    spec.name,
                    spec.kind,
                    value
                ),
            }
        }
        data
    }

    /// Encode the declared fields of `data`. Values that do not fit their
    /// field's kind are reported and left out.
    fn encode_fields(&self, id: &str, data: &FieldMap) -> Vec<(String, String)> {
        data.iter()
            .filter_map(|(name, value)| {
                let spec = self.definition.field(name)?;
                match spec.kind.encode(value) {
                    Some(raw) => Some((name.clone(), raw)),
                    None => {
                        self.report(
                            "write",
                            Some(id),
                            &CoreError::InvalidValue {
                                field: name.clone(),
                                expected: spec.kind.as_str(),
                                value: value.to_string(),
                            },
                        );
                        None
                    }
                }
            })
            .collect()
    }

    async fn write_fields(
        &self,
        id: &str,
        data: &FieldMap,
        mode: WriteMode,
        expires_in: Option<u64>,
    ) -> Result<usize, CoreError> {
        let pairs = self.encode_fields(id, data);
        let active = self.touch(id).await?;
        let ttl = expires_in.unwrap_or_else(|| self.policy().expiry_for(active));
        let key = self.entry_key(id);

        if pairs.is_empty() {
            // EXPIRE with 0 deletes the key
            if ttl > 0 {
                self.tier.expire(&key, ttl).await?;
            }
        } else {
            self.tier.hash_write(&key, &pairs, mode, ttl).await?;
        }
        Ok(pairs.len())
    }

    /// Record values projected onto the declared fields, defaults filling gaps
    fn project(&self, fields: &FieldMap) -> FieldMap {
        let defaults = self.definition.defaults();
        self.definition
            .fields()
            .iter()
            .filter_map(|spec| {
                let value = fields
                    .get(&spec.name)
                    .and_then(|v| spec.kind.coerce(v))
                    .or_else(|| defaults.get(&spec.name).cloned())?;
                Some((spec.name.clone(), value))
            })
            .collect()
    }

    async fn try_get(&self, id: &str) -> Result<FieldMap, CoreError> {
        self.ensure_ready()?;
        self.check_id(id)?;

        let key = self.entry_key(id);
        let raw = self.tier.hash_get_all(&key).await?;

        if !raw.is_empty() {
            let data = self.decode_entry(id, &raw);
            let active = self.touch(id).await?;
            self.tier
                .expire(&key, self.policy().expiry_for(active))
                .await?;

            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("hearth_cache_hits_total", "node" => self.name().to_string())
                .increment(1);
            return Ok(data);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("hearth_cache_misses_total", "node" => self.name().to_string())
            .increment(1);
        debug!("Cache miss for {}:{}, loading from record store", self.name(), id);

        self.hydrate(id).await
    }

    /// Populate a missing entry from its record, creating the record from
    /// defaults when none exists.
    ///
    /// The cache is filled without overwriting fields that concurrent writers
    /// stored in the meantime.
    async fn hydrate(&self, id: &str) -> Result<FieldMap, CoreError> {
        let data = match self.store.find_one(id).await? {
            Some(record) => self.project(&record.fields),
            None => {
                let defaults = self.project(&FieldMap::new());
                match self.store.create(id, &defaults).await {
                    Ok(_) => {
                        self.stats.records_created.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(
                            "hearth_records_created_total",
                            "node" => self.name().to_string()
                        )
                        .increment(1);
                        debug!("Created record {}:{} from defaults", self.name(), id);
                        defaults
                    }
                    Err(e) if e.is_duplicate() => {
                        debug!(
                            "Record {}:{} was created concurrently, re-reading",
                            self.name(),
                            id
                        );
                        let record = self.find_existing(id).await?;
                        self.project(&record.fields)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        self.write_fields(id, &data, WriteMode::FillMissing, None)
            .await?;
        self.stats.hydrations.fetch_add(1, Ordering::Relaxed);
        Ok(data)
    }

    async fn find_existing(&self, id: &str) -> Result<Record, CoreError> {
        self.store
            .find_one(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("{}:{}", self.name(), id)))
    }

    async fn try_increment(&self, id: &str, field: &str, amount: i64) -> Result<i64, CoreError> {
        let spec = self.definition.field(field).ok_or_else(|| CoreError::UnknownField {
            node: self.name().to_string(),
            field: field.to_string(),
        })?;
        if !spec.kind.is_numeric() {
            return Err(CoreError::InvalidValue {
                field: field.to_string(),
                expected: "integer",
                value: spec.kind.to_string(),
            });
        }

        self.try_get(id).await?;

        let active_ttl = self.policy().active_ttl;
        let value = self
            .tier
            .hash_increment(&self.entry_key(id), field, amount, active_ttl)
            .await?;
        self.tier
            .set_ex(
                &self.marker_key(id),
                &self.clock.now_millis().to_string(),
                active_ttl,
            )
            .await?;
        Ok(value)
    }

    async fn try_update(&self, id: &str, field: &str, value: FieldValue) -> Result<(), CoreError> {
        let spec = self.definition.field(field).ok_or_else(|| CoreError::UnknownField {
            node: self.name().to_string(),
            field: field.to_string(),
        })?;
        let value = spec.kind.coerce(&value).ok_or_else(|| CoreError::InvalidValue {
            field: field.to_string(),
            expected: spec.kind.as_str(),
            value: value.to_string(),
        })?;

        self.try_get(id).await?;

        let mut data = FieldMap::new();
        data.insert(field.to_string(), value);
        self.write_fields(id, &data, WriteMode::Overwrite, None)
            .await?;
        Ok(())
    }

    /// Persist one entry, then evict it if its entity went idle
    async fn sync_entry(&self, id: &str) -> Result<Option<EntryOutcome>, CoreError> {
        let entry_key = self.entry_key(id);
        let marker_key = self.marker_key(id);

        // Read the marker first: eviction only goes ahead if nobody touched
        // the entity after this point.
        let marker = self.tier.get(&marker_key).await?;
        let raw = self.tier.hash_get_all(&entry_key).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let data = self.decode_entry(id, &raw);

        let persisted = match self.store.find_one(id).await? {
            Some(record) => self.persist_changes(&record, &data).await?,
            None => match self.store.create(id, &data).await {
                Ok(_) => Persisted::Created,
                Err(DbError::Duplicate(_)) => {
                    let record = self.find_existing(id).await?;
                    self.persist_changes(&record, &data).await?
                }
                Err(e) => return Err(e.into()),
            },
        };

        let evicted = if self.active_from(marker.as_deref()) {
            self.tier
                .expire(&entry_key, self.policy().active_ttl)
                .await?;
            false
        } else {
            let evicted = self
                .tier
                .delete_guarded(&[entry_key, marker_key.clone()], &marker_key, marker.as_deref())
                .await?;
            if !evicted {
                debug!(
                    "Skipped eviction of {}:{}, accessed during sweep",
                    self.name(),
                    id
                );
            }
            evicted
        };

        Ok(Some(EntryOutcome { persisted, evicted }))
    }

    async fn persist_changes(&self, record: &Record, data: &FieldMap) -> Result<Persisted, CoreError> {
        let changes = record.diff(data);
        if changes.is_empty() {
            return Ok(Persisted::Unchanged);
        }
        self.store.update(record, &changes).await?;
        Ok(Persisted::Updated)
    }
}
