//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_NANOS: AtomicI64 = AtomicI64::new(0);

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC time as an RFC 3339 string, second precision
pub fn now_rfc3339() -> String {
    now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Nanoseconds since the epoch, strictly increasing across calls in this process
///
/// Wall-clock readings that repeat or step backwards are bumped past the last
/// value handed out.
pub fn monotonic_nanos() -> i64 {
    let wall = now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    let mut last = LAST_NANOS.load(Ordering::Relaxed);
    loop {
        let next = if wall > last { wall } else { last + 1 };
        match LAST_NANOS.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
