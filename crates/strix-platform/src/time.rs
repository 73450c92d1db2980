//! Clock helpers shared by the delayed-task paths and the platform surface.

use std::time::{SystemTime, UNIX_EPOCH};

/// Convert a delay in seconds to whole milliseconds.
///
/// Rounds the seconds value half-up first and multiplies afterwards, which
/// deliberately keeps whole-second resolution: 0.4 s is 0 ms, 0.5 s is
/// 1000 ms, 1.499 s is 1000 ms. Negative and non-finite delays clamp to 0.
pub fn delay_to_millis(delay_seconds: f64) -> u64 {
    (delay_seconds + 0.5) as u64 * 1000
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn wall_clock_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the Unix epoch")
        .as_secs_f64()
        * 1000.0
}
