//! End-to-end consume tests over the real SQLite queue and contact store.
//!
//! Each test provisions a scratch queue and store, enqueues wrapped JSON
//! payloads, and drives the consumer the way the binary does.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use intake::cancel::CancelFlag;
use intake::config::StoreConfig;
use intake::consumer::{Clock, Consumer, RunWindow, StopReason, TransactionOutcome};
use intake::queue::SqliteQueue;
use intake::store::SqliteContactStore;
use intake::worker::Worker;

const SHORT: Duration = Duration::from_millis(20);

struct FixedClock(u32);

impl Clock for FixedClock {
    fn current_hour(&self) -> u32 {
        self.0
    }
}

fn store_config(dir: &Path) -> StoreConfig {
    StoreConfig {
        db_path: dir.join("contacts.db"),
        ..StoreConfig::default()
    }
}

fn open_queue(dir: &Path) -> SqliteQueue {
    let path = dir.join("queue.db");
    SqliteQueue::provision(&path, "intake").unwrap();
    SqliteQueue::open(&path, "intake")
        .unwrap()
        .with_poll_interval(Duration::from_millis(5))
}

fn open_consumer(
    dir: &Path,
    cancel: CancelFlag,
    window: Option<RunWindow>,
    hour: u32,
) -> Consumer<SqliteQueue, SqliteContactStore, FixedClock> {
    let config = store_config(dir);
    let store = SqliteContactStore::open(&config.db_path, &config).unwrap();
    let worker = Worker::new(store, config.natural_key_field.as_str());
    Consumer::with_clock(open_queue(dir), worker, cancel, window, SHORT, FixedClock(hour))
}

fn contact_count(dir: &Path) -> u64 {
    let config = store_config(dir);
    SqliteContactStore::open(&config.db_path, &config).unwrap().count().unwrap()
}

/// Drive the consumer until a receive times out, returning the outcomes.
async fn drain(consumer: &mut Consumer<SqliteQueue, SqliteContactStore, FixedClock>) -> Vec<TransactionOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let outcome = consumer.process_one().await.unwrap();
        if outcome == TransactionOutcome::Skipped {
            return outcomes;
        }
        outcomes.push(outcome);
    }
}

#[tokio::test]
async fn test_drains_queue_into_contact_store() {
    let temp = TempDir::new().unwrap();
    {
        let queue = open_queue(temp.path());
        queue
            .enqueue("signup", &json!({"email": "jo@example.com", "first_name": "Jo", "last_name": "Doe"}))
            .unwrap();
        queue
            .enqueue("signup", &json!({"email": "sam@example.com", "first_name": "Sam"}))
            .unwrap();
    }

    let mut consumer = open_consumer(temp.path(), CancelFlag::new(), None, 10);
    let outcomes = drain(&mut consumer).await;

    assert_eq!(outcomes, vec![TransactionOutcome::Committed, TransactionOutcome::Committed]);
    assert_eq!(contact_count(temp.path()), 2);

    // Queue is fully drained
    let queue = open_queue(temp.path());
    assert_eq!(queue.depth().unwrap(), 0);
}

#[tokio::test]
async fn test_redelivered_payload_creates_one_contact() {
    let temp = TempDir::new().unwrap();
    let payload = json!({"email": "jo@example.com", "first_name": "Jo"});
    {
        let queue = open_queue(temp.path());
        // Same payload twice, simulating redelivery after a crash between
        // store commit and queue commit
        queue.enqueue("signup", &payload).unwrap();
        queue.enqueue("signup", &payload).unwrap();
    }

    let mut consumer = open_consumer(temp.path(), CancelFlag::new(), None, 10);
    let outcomes = drain(&mut consumer).await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(contact_count(temp.path()), 1);
}

#[tokio::test]
async fn test_malformed_body_is_discarded_not_retried() {
    let temp = TempDir::new().unwrap();
    {
        let queue = open_queue(temp.path());
        queue.enqueue_raw("garbage", b"not an envelope at all").unwrap();
        queue.enqueue("signup", &json!({"email": "jo@example.com"})).unwrap();
    }

    let mut consumer = open_consumer(temp.path(), CancelFlag::new(), None, 10);
    let outcomes = drain(&mut consumer).await;

    // Both messages end up committed; only the valid one created a contact
    assert_eq!(outcomes, vec![TransactionOutcome::Committed, TransactionOutcome::Committed]);
    assert_eq!(contact_count(temp.path()), 1);
}

#[tokio::test]
async fn test_abort_on_cancel_then_redelivery_succeeds() {
    let temp = TempDir::new().unwrap();
    {
        let queue = open_queue(temp.path());
        queue.enqueue("signup", &json!({"email": "jo@example.com"})).unwrap();
    }

    // First attempt: cancellation arrives while the message is in flight
    {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut consumer = open_consumer(temp.path(), cancel, None, 10);
        let outcome = consumer.process_one().await.unwrap();
        assert_eq!(outcome, TransactionOutcome::Aborted);
        assert_eq!(contact_count(temp.path()), 0);
    }

    // Simulated restart: fresh consumer, fresh flag; the aborted message is
    // redelivered and processed
    {
        let mut consumer = open_consumer(temp.path(), CancelFlag::new(), None, 10);
        let outcome = consumer.process_one().await.unwrap();
        assert_eq!(outcome, TransactionOutcome::Committed);
        assert_eq!(contact_count(temp.path()), 1);
    }
}

#[tokio::test]
async fn test_window_gate_stops_before_any_receive() {
    let temp = TempDir::new().unwrap();
    {
        let queue = open_queue(temp.path());
        queue.enqueue("signup", &json!({"email": "jo@example.com"})).unwrap();
    }

    let window = RunWindow::parse("8,18").unwrap();
    let mut consumer = open_consumer(temp.path(), CancelFlag::new(), Some(window), 20);
    let reason = consumer.run().await.unwrap();

    assert_eq!(reason, StopReason::WindowClosed);
    // The message was never taken off the queue
    let queue = open_queue(temp.path());
    assert_eq!(queue.depth().unwrap(), 1);
    assert_eq!(contact_count(temp.path()), 0);
}

#[tokio::test]
async fn test_window_gate_proceeds_inside_active_hours() {
    let temp = TempDir::new().unwrap();
    {
        let queue = open_queue(temp.path());
        queue.enqueue("signup", &json!({"email": "jo@example.com"})).unwrap();
    }

    let window = RunWindow::parse("8,18").unwrap();
    let cancel = CancelFlag::new();
    let mut consumer = open_consumer(temp.path(), cancel.clone(), Some(window), 10);

    let outcome = consumer.process_one().await.unwrap();
    assert_eq!(outcome, TransactionOutcome::Committed);
    assert_eq!(contact_count(temp.path()), 1);

    // With the queue empty the loop keeps idling; stop it via cancellation
    cancel.cancel();
    let reason = consumer.run().await.unwrap();
    assert_eq!(reason, StopReason::Cancelled);
}

#[tokio::test]
async fn test_idle_receive_resolves_nothing() {
    let temp = TempDir::new().unwrap();
    let mut consumer = open_consumer(temp.path(), CancelFlag::new(), None, 10);

    let outcome = consumer.process_one().await.unwrap();

    assert_eq!(outcome, TransactionOutcome::Skipped);
    assert_eq!(contact_count(temp.path()), 0);
}
