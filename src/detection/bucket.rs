//! Leaky-bucket arithmetic
//!
//! A bucket loses one unit every `leak_speed` seconds since the last
//! occurrence and never drops below zero.

use crate::models::Event;

/// Fill level after leaking for `current_time - last_event_time` seconds
///
/// A non-positive `leak_speed` leaks nothing.
pub fn leaking_bucket_count(
    current_time: i64,
    last_bucket_fill: u32,
    last_event_time: i64,
    leak_speed: i64,
) -> u32 {
    if leak_speed <= 0 {
        return last_bucket_fill;
    }
    let elapsed = current_time.saturating_sub(last_event_time).max(0);
    let leaked = elapsed.div_euclid(leak_speed);
    (last_bucket_fill as i64 - leaked).max(0) as u32
}

/// Whether `event` is still inside its cooldown window at `now`
pub fn is_black_holed(event: &Event, black_hole: i64, now: i64) -> bool {
    event.last_event_date.saturating_add(black_hole) > now
}
