use std::time::{SystemTime, UNIX_EPOCH};

use ulid::Ulid;

/// Returns current unix epoch seconds with sub-second precision.
///
/// This is the `timestamp` unit of every outbound event.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Generates a new ULID.
pub fn new_ulid() -> Ulid {
    Ulid::new()
}
