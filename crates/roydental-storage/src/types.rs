//! Storage types for the backing-store abstraction layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A row as held by the backing store.
///
/// `data` is the full serialized record; `id` and `parent_id` are lifted
/// out of it so backends can index them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub parent_id: Option<String>,
    pub data: Value,
}

impl StoredRecord {
    /// Creates a new `StoredRecord`.
    #[must_use]
    pub fn new(id: impl Into<String>, parent_id: Option<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            parent_id,
            data,
        }
    }
}

/// A single `field = value` predicate on the record data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub value: Value,
}

/// Conjunction of equality predicates. An empty filter matches every row.
///
/// The parent link is matched against the row's `parent_id` column rather
/// than the record data, so backends can serve it from an index.
///
/// ```
/// use roydental_storage::Filter;
///
/// let filter = Filter::new()
///     .eq("first_name", "Kofi")
///     .eq("last_name", "Mensah");
/// assert_eq!(filter.conditions().len(), 2);
///
/// let owned = Filter::by_parent("DP-000001");
/// assert_eq!(owned.parent_id(), Some("DP-000001"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    parent_id: Option<String>,
    conditions: Vec<Condition>,
}

impl Filter {
    /// Creates a new empty `Filter`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches rows whose `field` holds exactly `value`.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Matches every row owned by `parent_id`.
    #[must_use]
    pub fn by_parent(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            conditions: Vec::new(),
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.parent_id.is_none() && self.conditions.is_empty()
    }

    /// Evaluates the filter against a stored row.
    pub fn matches(&self, record: &StoredRecord) -> bool {
        if let Some(parent) = &self.parent_id
            && record.parent_id.as_deref() != Some(parent.as_str())
        {
            return false;
        }
        self.conditions
            .iter()
            .all(|c| record.data.get(&c.field) == Some(&c.value))
    }
}

/// Row lock taken by [`Transaction::read_row`](crate::Transaction::read_row).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    /// Keeps the row from being deleted until the transaction ends.
    Share,
    /// Also excludes `Share` holders; taken before deleting the row.
    Exclusive,
}

impl FromIterator<(&'static str, Value)> for Filter {
    fn from_iter<I: IntoIterator<Item = (&'static str, Value)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Filter::new(), |filter, (field, value)| filter.eq(field, value))
    }
}
