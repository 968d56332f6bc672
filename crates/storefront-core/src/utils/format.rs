use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

/// Display format for chat timestamps, e.g. `3/14/2025, 9:05:07 PM`
const TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format a server `created_at` value for display in local time.
///
/// Accepts RFC 3339 (`2025-03-14T21:05:07.000Z`) and the bare
/// `YYYY-MM-DD HH:MM:SS` form, which is read as local time.
/// Anything else is returned unchanged.
pub fn format_timestamp(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string();
    }
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, pattern) {
            if let Some(local) = Local.from_local_datetime(&naive).earliest() {
                return local.format(TIMESTAMP_FORMAT).to_string();
            }
        }
    }
    raw.to_string()
}

/// Format an instant for display the same way server timestamps are
pub fn format_instant<Tz: TimeZone>(instant: &DateTime<Tz>) -> String {
    instant.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}
