pub mod push_event;
pub mod readings;
pub mod ws_protocol;

use std::time::{SystemTime, UNIX_EPOCH};

/// Epoch milliseconds, used for all reading timestamps.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
