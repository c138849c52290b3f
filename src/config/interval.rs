//! Human-readable durations: `"500ms"`, `"90s"`, `"30m"`, `"6h"`, `"1d"`.
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Parse interval string like "1h", "30m", "6h", "1d". Bare numbers are seconds.
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    let parse = |digits: &str, unit: &str| {
        digits
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("Invalid {}: {}", unit, digits))
    };

    if let Some(ms) = s.strip_suffix("ms") {
        parse(ms, "milliseconds").map(Duration::from_millis)
    } else if let Some(hours) = s.strip_suffix('h') {
        parse(hours, "hours").map(|h| Duration::from_secs(h * 3600))
    } else if let Some(minutes) = s.strip_suffix('m') {
        parse(minutes, "minutes").map(|m| Duration::from_secs(m * 60))
    } else if let Some(days) = s.strip_suffix('d') {
        parse(days, "days").map(|d| Duration::from_secs(d * 86400))
    } else if let Some(secs) = s.strip_suffix('s') {
        parse(secs, "seconds").map(Duration::from_secs)
    } else {
        s.parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s))
    }
}

/// Format interval for display, using the largest unit that divides it exactly.
pub fn format_interval(interval: Duration) -> String {
    let millis = interval.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = interval.as_secs();
    if secs >= 86400 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_interval(&raw).map_err(serde::de::Error::custom)
}
