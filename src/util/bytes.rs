//! Byte counts: human-readable sizes for cache statistics and body limits.

use axum::body::{Body, HttpBody};

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Render `bytes` in binary units with at most two decimals, trailing zeros trimmed.
pub fn human_bytes(bytes: u64) -> String {
    let mut scaled = bytes as f64;
    let mut unit = 0;
    while scaled >= 1024.0 && unit + 1 < UNITS.len() {
        scaled /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        return format!("{bytes} B");
    }

    let rendered = format!("{scaled:.2}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered} {}", UNITS[unit])
}

/// Whether `body` is known to hold at most `limit` bytes. Streaming bodies
/// without an upper bound never fit.
pub fn body_within(body: &Body, limit: usize) -> bool {
    body.size_hint()
        .upper()
        .is_some_and(|upper| upper <= limit as u64)
}
