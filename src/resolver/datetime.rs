//! Permissive temporal parsing
//!
//! Source exports rarely agree on one timestamp format. Parsing tries the
//! common formats in order of likelihood; callers treat a miss as a
//! coercion warning, never a failure.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y%m%dT%H%M%S",
    "%d/%m/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%d/%m/%Y"];

/// Parse a timestamp in any recognized format.
pub fn parse_flexible_datetime(input: &str) -> Option<NaiveDateTime> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    // Bare dates count as midnight.
    parse_flexible_date_only(trimmed).map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn parse_flexible_date_only(input: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
}

/// Parse a calendar date, accepting full timestamps and keeping their
/// date part.
pub fn parse_flexible_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_flexible_date_only(trimmed).or_else(|| parse_flexible_datetime(trimmed).map(|dt| dt.date()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_datetime_formats() {
        for input in [
            "2021-03-04T05:06:07Z",
            "2021-03-04T05:06:07",
            "2021-03-04 05:06:07",
            "2021-03-04 05:06:07.123",
            "20210304T050607",
        ] {
            let dt = parse_flexible_datetime(input).unwrap_or_else(|| panic!("failed: {input}"));
            assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2021, 3, 4).unwrap());
        }
    }

    #[test]
    fn bare_dates_become_midnight() {
        let dt = parse_flexible_datetime("1980-12-01").unwrap();
        assert_eq!(dt.to_string(), "1980-12-01 00:00:00");
    }

    #[test]
    fn date_accepts_timestamps() {
        assert_eq!(
            parse_flexible_date("2021-03-04T05:06:07Z").unwrap(),
            NaiveDate::from_ymd_opt(2021, 3, 4).unwrap()
        );
        assert_eq!(
            parse_flexible_date("2021/03/04").unwrap(),
            NaiveDate::from_ymd_opt(2021, 3, 4).unwrap()
        );
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse_flexible_datetime("not a date").is_none());
        assert!(parse_flexible_date("").is_none());
    }
}
