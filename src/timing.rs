// src/timing.rs

//! Time helpers shared by tasks: awake-time jitter, countdown parsing and
//! timestamp formatting.

use std::time::Duration;

use chrono::{Local, TimeZone};
use rand::Rng;

/// Lower bound for the random part added by [`awake_time`].
pub const MIN_JITTER_MS: i64 = 180_000;

/// Compute the next awake time: `now + delay + random(jitter/4 .. jitter)`.
///
/// `jitter_ms` is raised to [`MIN_JITTER_MS`] so a repeating job never lands
/// on an exact cadence.
pub fn awake_time(now_ms: i64, delay_ms: i64, jitter_ms: i64) -> i64 {
    let jitter = jitter_ms.max(MIN_JITTER_MS);
    let extra = rand::thread_rng().gen_range(jitter / 4..jitter);
    now_ms.saturating_add(delay_ms.max(0)).saturating_add(extra)
}

/// Parse countdown text such as `"01:02:03"`, `"02:03"` or `"3"`.
///
/// Fields are read right to left as seconds, minutes, hours. Returns `None`
/// for empty input, more than three fields, non-numeric fields, or a total
/// that does not fit in a `u64` of seconds.
pub fn parse_countdown(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let fields: Vec<&str> = text.split(':').collect();
    if fields.len() > 3 {
        return None;
    }

    let mut secs: u64 = 0;
    for (field, multiplier) in fields.iter().rev().zip([1u64, 60, 3600]) {
        let value: u64 = field.trim().parse().ok()?;
        secs = secs.checked_add(value.checked_mul(multiplier)?)?;
    }

    Some(Duration::from_secs(secs))
}

/// Format an epoch-millisecond timestamp as local `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(ms: i64) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{ms}ms"),
    }
}
