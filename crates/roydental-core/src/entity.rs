//! Per-type entity descriptors.
//!
//! A descriptor carries everything the generic repository needs to know
//! about one entity type: its table, id scheme, cache keys, lock keys,
//! natural key, parent link and the columns an update may change.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::Result;
use crate::id::IdScheme;

/// Cache entries for every entity type live for seven days.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Shape of the per-record cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// `{prefix}:{id}`
    ById,
    /// `{prefix}:{parent_id}:{id}`
    ByParentAndId,
}

/// Owning reference from a dependent type to its aggregate root.
#[derive(Debug, Clone, Copy)]
pub struct ParentLink {
    /// Field on the dependent record holding the parent id.
    pub field: &'static str,
    pub entity: &'static EntityDescriptor,
}

/// Static configuration of one entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Singular snake_case name, also the lock namespace (`{name}_lock`).
    pub name: &'static str,
    pub table: &'static str,
    /// Field holding the primary key in the serialized record.
    pub id_field: &'static str,
    pub id_scheme: IdScheme,
    pub cache_prefix: &'static str,
    /// Namespace-wide "all records" key.
    pub collection_key: &'static str,
    pub cache_scope: CacheScope,
    pub ttl: Duration,
    pub parent: Option<ParentLink>,
    /// Fields that together must be unique; empty when the type has none.
    pub natural_key: &'static [&'static str],
    /// Columns an update is allowed to change.
    pub mutable_fields: &'static [&'static str],
}

impl EntityDescriptor {
    /// Cache key for a single record.
    ///
    /// Returns `None` for parent-scoped types when the parent is unknown.
    pub fn cache_key(&self, parent_id: Option<&str>, id: &str) -> Option<String> {
        match (self.cache_scope, parent_id) {
            (CacheScope::ById, _) => Some(format!("{}:{id}", self.cache_prefix)),
            (CacheScope::ByParentAndId, Some(parent)) => {
                Some(format!("{}:{parent}:{id}", self.cache_prefix))
            }
            (CacheScope::ByParentAndId, None) => None,
        }
    }

    /// Cache key derived from a serialized record.
    pub fn cache_key_for(&self, record: &Value) -> Option<String> {
        let id = self.record_id(record)?;
        self.cache_key(self.record_parent_id(record).as_deref(), &id)
    }

    /// Primary key of a serialized record.
    pub fn record_id(&self, record: &Value) -> Option<String> {
        record.get(self.id_field).and_then(render_value)
    }

    /// Parent id of a serialized record, if the type has a parent.
    pub fn record_parent_id(&self, record: &Value) -> Option<String> {
        let link = self.parent?;
        record.get(link.field).and_then(render_value)
    }

    /// `(field, value)` pairs of the natural key, or `None` if the type has
    /// no natural key.
    pub fn natural_key_values(&self, record: &Value) -> Option<Vec<(&'static str, Value)>> {
        if self.natural_key.is_empty() {
            return None;
        }
        Some(
            self.natural_key
                .iter()
                .map(|field| (*field, record.get(*field).cloned().unwrap_or(Value::Null)))
                .collect(),
        )
    }

    /// Lock key guarding creation.
    ///
    /// Uses the natural-key tuple so that duplicate creates contend; types
    /// without a natural key serialize creation per parent.
    pub fn create_lock_key(&self, record: &Value) -> String {
        if let Some(values) = self.natural_key_values(record) {
            let parts: Vec<String> = values
                .iter()
                .map(|(_, v)| render_value(v).unwrap_or_default())
                .collect();
            return format!("{}_lock:{}", self.name, parts.join("_"));
        }
        match self.record_parent_id(record) {
            Some(parent) => format!("{}_lock:{parent}", self.name),
            None => format!("{}_lock:new", self.name),
        }
    }

    /// Lock key guarding update and delete of an existing record.
    pub fn record_lock_key(&self, id: &str) -> String {
        format!("{}_lock:{id}", self.name)
    }

    /// Keep only the mutable columns of a record.
    pub fn mutable_projection(&self, record: &Value) -> Value {
        let mut out = serde_json::Map::new();
        if let Value::Object(map) = record {
            for field in self.mutable_fields {
                if let Some(v) = map.get(*field) {
                    out.insert((*field).to_string(), v.clone());
                }
            }
        }
        Value::Object(out)
    }
}

impl fmt::Display for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Render a scalar JSON value as key material.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// A persisted record type managed by the generic repository.
pub trait Entity: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    fn descriptor() -> &'static EntityDescriptor;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Id of the owning aggregate root.
    fn parent_id(&self) -> Option<&str> {
        None
    }

    fn set_created_at(&mut self, _at: OffsetDateTime) {}

    /// Fill derived fields and canonicalize input before validation.
    fn normalize(&mut self) {}

    /// Reject records that violate domain rules.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Other records this one points at, which must exist when it is written.
    fn references(&self) -> Vec<(&'static EntityDescriptor, String)> {
        Vec::new()
    }
}
