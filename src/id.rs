//! ID generation utilities for Intake
//!
//! Provides functions for generating unique identifiers for queue messages
//! and store entity keys.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Generate a unique queue message ID
///
/// Format: `msg-{timestamp_ms}-{random_hex}`
/// Example: `msg-1738300800123-a1b2`
pub fn generate_message_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("msg-{}-{:04x}", timestamp, random)
}

/// Generate a surrogate key for a newly inserted store entity
///
/// Format: `{timestamp_ms}-{random_hex}`
/// Example: `1738300800123-9f3a2c4d`
pub fn generate_entity_key() -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("{}-{:08x}", timestamp, random)
}
