//! Browser caching headers.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{CACHE_CONTROL, EXPIRES},
};
use time::{Duration, OffsetDateTime, UtcOffset, macros::format_description};

pub fn http_date(at: OffsetDateTime) -> Option<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(UtcOffset::UTC).format(format).ok()
}

/// `Cache-Control: public, max-age=N` and a matching `Expires`. Headers the
/// origin already set are left alone.
pub fn apply_cache_headers(headers: &mut HeaderMap, max_age: u64, now: OffsetDateTime) {
    if headers.contains_key(CACHE_CONTROL) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={max_age}")) {
        headers.insert(CACHE_CONTROL, value);
    }

    let expires_at = i64::try_from(max_age)
        .ok()
        .and_then(|secs| now.checked_add(Duration::seconds(secs)));
    if let Some(value) = expires_at
        .and_then(http_date)
        .and_then(|date| HeaderValue::from_str(&date).ok())
    {
        headers.insert(EXPIRES, value);
    }
}
