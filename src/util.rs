//! Small time helpers shared by the provider/instance layers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX time in whole seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
