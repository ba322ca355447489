// =============================================================================
// Feed timestamp normalization
// =============================================================================

use chrono::{DateTime, NaiveDateTime};

use crate::errors::DecodeError;

/// Parse a feed timestamp into a naive-UTC instant.
///
/// The feed sends instants like `2025-06-22T13:48:39.499077Z`; explicit
/// offset forms (`+02:00`) are also accepted and converted to UTC. A string
/// with no zone marker is treated as already-UTC. Downstream comparisons all
/// use this one naive-UTC clock.
pub fn parse_feed_time(text: &str) -> Result<NaiveDateTime, DecodeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.naive_utc());
    }

    // No zone marker: already UTC.
    text.parse::<NaiveDateTime>()
        .map_err(|_| DecodeError::MalformedTimestamp(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn z_suffix_round_trips_wall_clock_fields() {
        let parsed = parse_feed_time("2025-06-22T13:48:39.499077Z").unwrap();
        let formatted = parsed.format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        assert_eq!(formatted, "2025-06-22T13:48:39.499077");
    }

    #[test]
    fn offset_form_converts_to_utc() {
        let parsed = parse_feed_time("2025-06-22T15:48:39.499077+02:00").unwrap();
        let formatted = parsed.format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        assert_eq!(formatted, "2025-06-22T13:48:39.499077");
    }

    #[test]
    fn zoneless_input_is_treated_as_utc() {
        let parsed = parse_feed_time("2023-01-01T12:00:00.000000").unwrap();
        assert_eq!(
            parsed,
            chrono::NaiveDate::from_ymd_opt(2023, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn garbage_is_rejected() {
        let err = parse_feed_time("not-a-timestamp").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedTimestamp(_)));
    }

    #[test]
    fn empty_string_is_rejected() {
        assert!(parse_feed_time("").is_err());
    }
}
