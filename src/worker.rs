//! Work executor - idempotent create-or-find of a contact record.
//!
//! The worker is constructed once, reused across all loop iterations, and
//! released when the loop exits. Each execution runs entirely inside one
//! store transaction: look the contact up by its natural key first, and only
//! create it when nothing matches. The existence check is what makes
//! redelivery of the same message safe.

use log::info;
use serde_json::{Map, Value};

use crate::error::{IntakeError, Result};
use crate::store::{EntityRecord, EntityRef, EntityStore};

/// Executes one parsed record against the contact store.
pub struct Worker<S: EntityStore> {
    store: S,
    natural_key_field: String,
}

impl<S: EntityStore> Worker<S> {
    /// Create a worker over `store`, deriving natural keys from
    /// `natural_key_field` (e.g. "email").
    pub fn new(store: S, natural_key_field: impl Into<String>) -> Self {
        Self {
            store,
            natural_key_field: natural_key_field.into(),
        }
    }

    /// Apply one record, returning a reference to the existing or newly
    /// created contact.
    ///
    /// Fails the whole operation on any unrecoverable store error; the
    /// caller decides queue-transaction disposition, not this method.
    pub fn execute(&mut self, correlation_id: &str, record: &Map<String, Value>) -> Result<EntityRef> {
        let natural_key = record
            .get(&self.natural_key_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                IntakeError::Store(format!("record is missing natural key field '{}'", self.natural_key_field))
            })?
            .to_string();

        let mut tx = self.store.transaction()?;

        let entity = match tx.find_by_natural_key(&natural_key)? {
            Some(key) => {
                let entity = tx.load_by_key(&key)?;
                info!(
                    "{} Existing contact: ({}) {}",
                    correlation_id,
                    key,
                    entity.get_value("record_number").unwrap_or_default()
                );
                entity
            }
            None => {
                let mut entity = EntityRecord::new();
                entity.merge(record);
                tx.insert(&mut entity, &natural_key)?;

                let key = entity
                    .current_key()
                    .ok_or_else(|| IntakeError::Store("insert did not assign a key".to_string()))?
                    .to_string();

                // Derived/denormalized fields are computed by the hook, so
                // reload to return the complete record
                tx.process_post_insert(&key)?;
                let entity = tx.load_by_key(&key)?;
                info!(
                    "{} Created contact: ({}) {}",
                    correlation_id,
                    key,
                    entity.get_value("record_number").unwrap_or_default()
                );
                entity
            }
        };

        let reference = EntityRef {
            key: entity
                .current_key()
                .ok_or_else(|| IntakeError::Store("loaded contact has no key".to_string()))?
                .to_string(),
            record_number: entity.get_value("record_number").unwrap_or_default(),
        };

        tx.commit()?;
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::{SqliteContactStore, StoreTransaction};
    use serde_json::json;
    use tempfile::TempDir;

    fn open_temp_worker() -> (Worker<SqliteContactStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteContactStore::open(&temp_dir.path().join("contacts.db"), &StoreConfig::default()).unwrap();
        (Worker::new(store, "email"), temp_dir)
    }

    fn open_store(temp_dir: &TempDir) -> SqliteContactStore {
        SqliteContactStore::open(&temp_dir.path().join("contacts.db"), &StoreConfig::default()).unwrap()
    }

    fn record(value: serde_json::Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_execute_creates_contact() {
        let (mut worker, temp) = open_temp_worker();
        let reference = worker
            .execute("msg-1", &record(json!({"email": "jo@example.com", "first_name": "Jo", "last_name": "Doe"})))
            .unwrap();

        assert_eq!(reference.record_number, "1");
        assert_eq!(open_store(&temp).count().unwrap(), 1);
    }

    #[test]
    fn test_execute_is_idempotent_by_natural_key() {
        let (mut worker, temp) = open_temp_worker();
        let fields = record(json!({"email": "jo@example.com", "first_name": "Jo"}));

        let first = worker.execute("msg-1", &fields).unwrap();
        // Simulated redelivery of the same payload
        let second = worker.execute("msg-2", &fields).unwrap();

        assert_eq!(first, second);
        assert_eq!(open_store(&temp).count().unwrap(), 1);
    }

    #[test]
    fn test_execute_returns_computed_fields() {
        let (mut worker, temp) = open_temp_worker();
        worker
            .execute("msg-1", &record(json!({"email": "jo@example.com", "first_name": "Jo", "last_name": "Doe"})))
            .unwrap();

        let mut store = open_store(&temp);
        let mut tx = store.transaction().unwrap();
        let key = tx.find_by_natural_key("jo@example.com").unwrap().unwrap();
        let loaded = tx.load_by_key(&key).unwrap();
        assert_eq!(loaded.get_value("display_name").unwrap(), "Jo Doe");
    }

    #[test]
    fn test_execute_missing_natural_key_fails() {
        let (mut worker, temp) = open_temp_worker();
        let err = worker.execute("msg-1", &record(json!({"first_name": "Jo"}))).unwrap_err();

        assert!(matches!(err, IntakeError::Store(_)));
        assert!(err.to_string().contains("email"));
        assert_eq!(open_store(&temp).count().unwrap(), 0);
    }

    #[test]
    fn test_failed_create_path_leaves_no_rows() {
        // Store whose post-insert hook always fails, so the create path
        // errors after the row was written inside the transaction
        struct HookFails(SqliteContactStore);
        struct HookFailsTx<'a>(Box<dyn StoreTransaction + 'a>);

        impl EntityStore for HookFails {
            fn transaction(&mut self) -> Result<Box<dyn StoreTransaction + '_>> {
                Ok(Box::new(HookFailsTx(self.0.transaction()?)))
            }
        }

        impl StoreTransaction for HookFailsTx<'_> {
            fn find_by_natural_key(&mut self, natural_key: &str) -> Result<Option<String>> {
                self.0.find_by_natural_key(natural_key)
            }
            fn load_by_key(&mut self, key: &str) -> Result<EntityRecord> {
                self.0.load_by_key(key)
            }
            fn insert(&mut self, entity: &mut EntityRecord, natural_key: &str) -> Result<()> {
                self.0.insert(entity, natural_key)
            }
            fn process_post_insert(&mut self, _key: &str) -> Result<()> {
                Err(IntakeError::Store("derived field computation failed".to_string()))
            }
            fn commit(self: Box<Self>) -> Result<()> {
                self.0.commit()
            }
        }

        let temp = TempDir::new().unwrap();
        let store = SqliteContactStore::open(&temp.path().join("contacts.db"), &StoreConfig::default()).unwrap();
        let mut worker = Worker::new(HookFails(store), "email");

        let err = worker
            .execute("msg-1", &record(json!({"email": "jo@example.com"})))
            .unwrap_err();
        assert!(matches!(err, IntakeError::Store(_)));

        // The transaction was dropped uncommitted, so nothing is visible
        assert_eq!(open_store(&temp).count().unwrap(), 0);
    }
}
