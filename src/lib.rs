//! Intake - a transactional queue-drain worker
//!
//! Intake drains a named transactional message queue, extracts a JSON payload
//! from each message envelope, and applies it idempotently against a contact
//! store. Each message gets exactly one terminal action (commit or abort), so
//! failed work is either retried via redelivery or discarded deliberately,
//! never left in limbo.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod id;
pub mod queue;
pub mod store;
pub mod worker;

pub use error::{IntakeError, Result};
