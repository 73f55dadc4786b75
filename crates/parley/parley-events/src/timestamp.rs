#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};

const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS`.
pub fn now_iso8601() -> String {
    Utc::now().format(FORMAT).to_string()
}

/// Formats seconds since the Unix epoch as `YYYY-MM-DDTHH:MM:SS` (UTC).
/// Out-of-range inputs format as the epoch.
pub fn iso8601_utc(unix_secs: i64) -> String {
    DateTime::from_timestamp(unix_secs, 0)
        .unwrap_or_default()
        .format(FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch() {
        assert_eq!(iso8601_utc(0), "1970-01-01T00:00:00");
    }

    #[test]
    fn known_instants() {
        assert_eq!(iso8601_utc(951_782_400), "2000-02-29T00:00:00");
        assert_eq!(iso8601_utc(1_700_000_000), "2023-11-14T22:13:20");
        assert_eq!(iso8601_utc(4_102_444_799), "2099-12-31T23:59:59");
    }

    #[test]
    fn before_epoch() {
        assert_eq!(iso8601_utc(-1), "1969-12-31T23:59:59");
    }

    #[test]
    fn out_of_range_is_epoch() {
        assert_eq!(iso8601_utc(i64::MAX), "1970-01-01T00:00:00");
    }

    #[test]
    fn now_has_fixed_width() {
        let now = now_iso8601();
        assert_eq!(now.len(), 19);
        assert_eq!(&now[10..11], "T");
    }
}
