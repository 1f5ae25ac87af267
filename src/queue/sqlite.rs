//! SQLite-backed transactional message queue.
//!
//! Messages live in a `messages` table scoped to a named queue. A receive
//! claims the oldest unclaimed message; commit deletes the row and abort
//! clears the claim so a later receive picks the message up again. Claims
//! left behind by a crashed process are released when the queue is reopened,
//! which is what makes redelivery-after-restart work.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde_json::Value;

use crate::envelope;
use crate::error::{IntakeError, Result};
use crate::id::{generate_message_id, now_ms};
use crate::queue::{MessageQueue, QueueMessage};

/// Default pause between claim attempts while a receive waits for a message.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// SQLite-backed queue for a single named queue.
#[derive(Debug)]
pub struct SqliteQueue {
    db: Connection,
    name: String,
    poll_interval: Duration,
}

impl SqliteQueue {
    /// Open the queue at `path`.
    ///
    /// Fails fast with `QueueUnavailable` when the named queue has not been
    /// provisioned - the consumer never creates queues itself. Stale claims
    /// from a previous process are released so those messages get
    /// redelivered.
    pub fn open(path: &Path, name: &str) -> Result<Self> {
        let db = Connection::open(path)
            .map_err(|e| IntakeError::QueueUnavailable(format!("cannot open queue database: {}", e)))?;
        Self::init_schema(&db)?;

        let exists: i64 = db
            .query_row("SELECT COUNT(*) FROM queues WHERE name = ?1", [name], |row| row.get(0))
            .map_err(backend_err)?;
        if exists == 0 {
            return Err(IntakeError::QueueUnavailable(format!("queue {} does not exist", name)));
        }

        db.execute("UPDATE messages SET claimed = 0 WHERE queue = ?1", [name])
            .map_err(backend_err)?;

        Ok(Self {
            db,
            name: name.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the claim-poll interval (mostly for tests).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Create the named queue if it does not exist yet.
    ///
    /// Provisioning is an operator/test concern; the consumer only verifies
    /// existence via [`SqliteQueue::open`].
    pub fn provision(path: &Path, name: &str) -> Result<()> {
        let db = Connection::open(path)
            .map_err(|e| IntakeError::QueueUnavailable(format!("cannot open queue database: {}", e)))?;
        Self::init_schema(&db)?;
        db.execute("INSERT OR IGNORE INTO queues (name) VALUES (?1)", [name])
            .map_err(backend_err)?;
        Ok(())
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queues (
                name TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL REFERENCES queues(name),
                label TEXT NOT NULL,
                body BLOB NOT NULL,
                enqueued_at INTEGER NOT NULL,
                claimed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_messages_queue ON messages(queue, claimed, enqueued_at);
            "#,
        )
        .map_err(backend_err)?;
        Ok(())
    }

    /// Enqueue a JSON payload wrapped in the transport envelope.
    ///
    /// Producer-side helper for tests and operators; returns the assigned
    /// message id.
    pub fn enqueue(&self, label: &str, payload: &Value) -> Result<String> {
        self.enqueue_raw(label, envelope::wrap(&payload.to_string()).as_bytes())
    }

    /// Enqueue an arbitrary body without wrapping it.
    pub fn enqueue_raw(&self, label: &str, body: &[u8]) -> Result<String> {
        let id = generate_message_id();
        self.db
            .execute(
                "INSERT INTO messages (id, queue, label, body, enqueued_at, claimed) VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![id, self.name, label, body, now_ms() as i64],
            )
            .map_err(|e| IntakeError::Queue(format!("enqueue failed: {}", e)))?;
        Ok(id)
    }

    /// Number of messages currently in the queue (claimed or not).
    pub fn depth(&self) -> Result<u64> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM messages WHERE queue = ?1", [self.name.as_str()], |row| {
                row.get(0)
            })
            .map_err(backend_err)?;
        Ok(count as u64)
    }

    /// Claim the oldest unclaimed message, if any.
    fn claim_next(&mut self) -> Result<Option<QueueMessage>> {
        let row = self
            .db
            .query_row(
                "SELECT id, label, body FROM messages
                 WHERE queue = ?1 AND claimed = 0
                 ORDER BY enqueued_at, id LIMIT 1",
                [self.name.as_str()],
                |row| {
                    Ok(QueueMessage {
                        id: row.get(0)?,
                        label: row.get(1)?,
                        body: row.get(2)?,
                    })
                },
            );

        let message = match row {
            Ok(message) => message,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(backend_err(e)),
        };

        let claimed = self
            .db
            .execute("UPDATE messages SET claimed = 1 WHERE id = ?1 AND claimed = 0", [message.id.as_str()])
            .map_err(backend_err)?;
        if claimed == 0 {
            // Single consumer, so a lost claim race means the backend is off
            return Err(IntakeError::Queue(format!("message {} could not be claimed", message.id)));
        }

        Ok(Some(message))
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<QueueMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.claim_next()? {
                return Ok(Some(message));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    fn commit(&mut self, message: &QueueMessage) -> Result<()> {
        let removed = self
            .db
            .execute("DELETE FROM messages WHERE id = ?1 AND queue = ?2", params![message.id, self.name])
            .map_err(backend_err)?;
        if removed == 0 {
            return Err(IntakeError::Queue(format!("message {} was already resolved", message.id)));
        }
        Ok(())
    }

    fn abort(&mut self, message: &QueueMessage) -> Result<()> {
        let released = self
            .db
            .execute(
                "UPDATE messages SET claimed = 0 WHERE id = ?1 AND queue = ?2",
                params![message.id, self.name],
            )
            .map_err(backend_err)?;
        if released == 0 {
            return Err(IntakeError::Queue(format!("message {} was already resolved", message.id)));
        }
        Ok(())
    }
}

fn backend_err(e: rusqlite::Error) -> IntakeError {
    IntakeError::QueueUnavailable(format!("queue backend error: {}", e))
}
