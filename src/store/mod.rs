//! Contact store abstraction.
//!
//! The work executor talks to the store through two seams: `EntityStore`
//! opens a transaction, and `StoreTransaction` exposes the entity facade
//! operations (lookup by natural key, load by key, insert, post-insert hook).
//! Dropping a transaction without committing rolls everything back, which is
//! what keeps a failed create path invisible.

use serde_json::{Map, Value};

use crate::error::Result;

pub mod sqlite;

pub use sqlite::SqliteContactStore;

/// One row-backed entity, addressed by a surrogate key.
///
/// Field values are an open JSON map so producers can send whatever columns
/// they like; the store persists the full map and overlays computed fields
/// (record number, display name) when loading.
#[derive(Debug, Clone, Default)]
pub struct EntityRecord {
    key: Option<String>,
    fields: Map<String, Value>,
}

impl EntityRecord {
    /// Create an empty record with no key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge all fields from `other` onto this record, overwriting existing
    /// values.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (field, value) in other {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    /// The store-assigned key, once the record has been inserted or loaded.
    pub fn current_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Set the store-assigned key.
    pub fn set_current_key(&mut self, key: impl Into<String>) {
        self.key = Some(key.into());
    }

    /// Read a scalar field as a string; `None` for absent or non-scalar
    /// values.
    pub fn get_value(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Set a single field value.
    pub fn set_value(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Borrow the full field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Reference to a stored entity, returned by the work executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    /// Store-assigned surrogate key
    pub key: String,
    /// Human-facing record number
    pub record_number: String,
}

/// Seam over the store backend; hands out transactions.
pub trait EntityStore: Send {
    /// Open a store transaction. Commit is explicit; drop rolls back.
    fn transaction(&mut self) -> Result<Box<dyn StoreTransaction + '_>>;
}

/// One store transaction's view of the entity facade.
pub trait StoreTransaction {
    /// Look up a non-deleted entity by its natural key, returning its
    /// surrogate key when found. This is the idempotency guard that makes
    /// redelivery safe.
    fn find_by_natural_key(&mut self, natural_key: &str) -> Result<Option<String>>;

    /// Load the full record for a key, computed fields included.
    fn load_by_key(&mut self, key: &str) -> Result<EntityRecord>;

    /// Insert a new entity, assigning its key and record number into
    /// `entity`. Fails the whole operation on any structured store error.
    fn insert(&mut self, entity: &mut EntityRecord, natural_key: &str) -> Result<()>;

    /// Store-mandated post-insert side-effect hook (derived/denormalized
    /// field computation). Callers re-fetch by key afterwards.
    fn process_post_insert(&mut self, key: &str) -> Result<()>;

    /// Commit the transaction, making all writes visible.
    fn commit(self: Box<Self>) -> Result<()>;
}
