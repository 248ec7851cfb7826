//! Provider timestamp parsing.

use chrono::{DateTime, Utc};

/// Parse an ISO-8601 / RFC 3339 provider timestamp into UTC.
///
/// Returns `None` for absent, empty or unparseable input.
pub fn parse_provider_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
