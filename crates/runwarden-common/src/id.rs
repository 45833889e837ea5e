//! Snowflake identifiers for executions and alerts.
//!
//! Runbooks and alert rules carry operator-chosen IDs; everything the
//! engine creates at runtime (executions, alerts) gets a Snowflake ID so
//! that IDs sort by creation time.

use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initializes the generator with a machine and node identifier (0-31 each).
///
/// Calling this is optional; [`next_id`] falls back to `(1, 1)`.
pub fn init(machine_id: i32, node_id: i32) {
    let mut generator = ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *generator = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Returns a fresh Snowflake ID in decimal string form.
pub fn next_id() -> String {
    let mut generator = ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let bucket = generator.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}
