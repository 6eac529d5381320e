use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Wall-clock milliseconds since the Unix epoch.
///
/// Millisecond resolution is enough for observation timestamps; successive
/// calls are non-decreasing in the absence of clock jumps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_millis() as u64)
        .unwrap_or(0)
}
