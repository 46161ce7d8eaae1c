//! Duration strings as they appear in configuration ("30s", "5m", "500ms").

use std::time::Duration;

/// Parse a duration string like "5s", "500ms", "20m", or "1h".
///
/// A bare number is read as seconds. Returns `None` for anything else.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse an optional duration field, falling back to `default`.
pub fn parse_or(s: Option<&str>, default: Duration) -> Option<Duration> {
    match s {
        Some(s) => parse_duration(s),
        None => Some(default),
    }
}
