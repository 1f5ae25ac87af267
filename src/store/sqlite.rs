//! SQLite-backed contact store.
//!
//! Contacts are rows keyed by a surrogate key with the producer's full field
//! map kept as JSON alongside the indexed columns. The natural-key column is
//! what the executor's existence check queries; `display_name` is the
//! denormalized field the post-insert hook computes.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};

use crate::config::StoreConfig;
use crate::error::{IntakeError, Result};
use crate::id::{generate_entity_key, now_ms};
use crate::store::{EntityRecord, EntityStore, StoreTransaction};

/// SQLite-backed implementation of the contact store.
#[derive(Debug)]
pub struct SqliteContactStore {
    db: Connection,
    run_as: String,
}

impl SqliteContactStore {
    /// Open the store at `path` with the given identity context.
    ///
    /// A superuser identity creates the schema on first open; a plain
    /// identity requires the schema to already exist.
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        let db = Connection::open(path).map_err(|e| IntakeError::Store(format!("cannot open contact store: {}", e)))?;

        if config.superuser {
            Self::init_schema(&db)?;
        } else {
            let exists: i64 = db
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'contacts'",
                    [],
                    |row| row.get(0),
                )
                .map_err(store_err)?;
            if exists == 0 {
                return Err(IntakeError::Store(format!(
                    "contact schema is missing and identity '{}' may not create it",
                    config.run_as
                )));
            }
        }

        Ok(Self {
            db,
            run_as: config.run_as.clone(),
        })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                key TEXT PRIMARY KEY,
                natural_key TEXT NOT NULL,
                record_number INTEGER NOT NULL,
                display_name TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_contacts_natural_key ON contacts(natural_key, deleted);
            "#,
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Number of non-deleted contacts (test/ops helper).
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM contacts WHERE deleted = 0", [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(count as u64)
    }

    /// Soft-delete a contact by key (ops helper; deleted rows are invisible
    /// to the existence check).
    pub fn mark_deleted(&self, key: &str) -> Result<()> {
        self.db
            .execute("UPDATE contacts SET deleted = 1 WHERE key = ?1", [key])
            .map_err(store_err)?;
        Ok(())
    }
}

impl EntityStore for SqliteContactStore {
    fn transaction(&mut self) -> Result<Box<dyn StoreTransaction + '_>> {
        let tx = self.db.transaction().map_err(store_err)?;
        Ok(Box::new(SqliteStoreTx {
            tx,
            run_as: self.run_as.clone(),
        }))
    }
}

struct SqliteStoreTx<'c> {
    tx: rusqlite::Transaction<'c>,
    run_as: String,
}

impl StoreTransaction for SqliteStoreTx<'_> {
    fn find_by_natural_key(&mut self, natural_key: &str) -> Result<Option<String>> {
        self.tx
            .query_row(
                "SELECT key FROM contacts WHERE deleted = 0 AND natural_key = ?1",
                [natural_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)
    }

    fn load_by_key(&mut self, key: &str) -> Result<EntityRecord> {
        let (record_number, display_name, created_by, json_data): (i64, Option<String>, String, String) = self
            .tx
            .query_row(
                "SELECT record_number, display_name, created_by, json_data
                 FROM contacts WHERE deleted = 0 AND key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => IntakeError::Store(format!("no contact with key {}", key)),
                other => store_err(other),
            })?;

        let fields: Map<String, Value> = serde_json::from_str(&json_data)?;

        let mut record = EntityRecord::new();
        record.merge(&fields);
        record.set_value("record_number", Value::from(record_number));
        record.set_value("created_by", Value::from(created_by));
        if let Some(display_name) = display_name {
            record.set_value("display_name", Value::from(display_name));
        }
        record.set_current_key(key);
        Ok(record)
    }

    fn insert(&mut self, entity: &mut EntityRecord, natural_key: &str) -> Result<()> {
        let key = generate_entity_key();
        let record_number: i64 = self
            .tx
            .query_row("SELECT COALESCE(MAX(record_number), 0) + 1 FROM contacts", [], |row| row.get(0))
            .map_err(store_err)?;
        let json_data = serde_json::to_string(entity.fields())?;

        self.tx
            .execute(
                "INSERT INTO contacts (key, natural_key, record_number, display_name, deleted, created_by, created_at, json_data)
                 VALUES (?1, ?2, ?3, NULL, 0, ?4, ?5, ?6)",
                params![key, natural_key, record_number, self.run_as, now_ms() as i64, json_data],
            )
            .map_err(|e| IntakeError::Store(format!("insert failed: {}", e)))?;

        entity.set_current_key(&key);
        entity.set_value("record_number", Value::from(record_number));
        Ok(())
    }

    fn process_post_insert(&mut self, key: &str) -> Result<()> {
        let json_data: String = self
            .tx
            .query_row("SELECT json_data FROM contacts WHERE key = ?1", [key], |row| row.get(0))
            .map_err(store_err)?;
        let fields: Map<String, Value> = serde_json::from_str(&json_data)?;

        let display_name = [fields.get("first_name"), fields.get("last_name")]
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" ");

        if !display_name.is_empty() {
            self.tx
                .execute("UPDATE contacts SET display_name = ?1 WHERE key = ?2", params![display_name, key])
                .map_err(store_err)?;
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> IntakeError {
    IntakeError::Store(format!("store backend error: {}", e))
}
