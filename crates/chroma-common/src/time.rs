//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Shared primitives and utilities for the control client."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::Utc;

/// Wall-clock milliseconds since the unix epoch, used as a cache-buster.
pub fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render an elapsed duration as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Parse an `HH:MM:SS` label back into a duration.
///
/// Minutes and seconds must be below 60; hours may have more than two digits.
pub fn parse_hms(label: &str) -> Option<Duration> {
    let mut parts = label.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hms_formats_with_padding() {
        assert_eq!(format_hms(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(3_723)), "01:02:03");
        assert_eq!(format_hms(Duration::from_secs(100 * 3600)), "100:00:00");
    }

    #[test]
    fn hms_parses_and_rejects() {
        assert_eq!(parse_hms("01:02:03"), Some(Duration::from_secs(3_723)));
        assert_eq!(parse_hms("00:61:00"), None);
        assert_eq!(parse_hms("12:00"), None);
        assert_eq!(parse_hms("aa:bb:cc"), None);
    }

    #[test]
    fn millis_are_monotonic_enough() {
        let first = unix_millis();
        let second = unix_millis();
        assert!(second >= first);
    }
}
