//! Transactional message queue abstraction.
//!
//! A received message is claimed for exactly one iteration and must be
//! resolved with exactly one terminal action: `commit` removes it
//! permanently, `abort` returns it to the queue for redelivery. A receive
//! that times out claims nothing and needs no resolution.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod sqlite;

pub use sqlite::SqliteQueue;

/// Opaque transport envelope taken off the queue.
///
/// Owned exclusively by the current iteration; never shared across
/// iterations.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Unique message identifier, used as correlation id in logs
    pub id: String,
    /// Human label for logging
    pub label: String,
    /// Raw body bytes (the transport envelope)
    pub body: Vec<u8>,
}

/// Seam over the queue backend.
#[async_trait]
pub trait MessageQueue: Send {
    /// Block up to `timeout` for the next message, claiming it.
    ///
    /// `Ok(None)` is a normal idle tick. Backend failures are fatal to the
    /// run loop and surface as `QueueUnavailable`.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<QueueMessage>>;

    /// Permanently remove a claimed message.
    fn commit(&mut self, message: &QueueMessage) -> Result<()>;

    /// Return a claimed message to the queue for redelivery.
    fn abort(&mut self, message: &QueueMessage) -> Result<()>;
}
