//! Unix-epoch time helpers used for token expiry, replay windows and record
//! timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds
pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime predates the unix epoch")
        .as_secs()
}

/// Current unix time in milliseconds; message `createdAt` ordering relies on
/// this granularity
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime predates the unix epoch")
        .as_millis() as u64
}
