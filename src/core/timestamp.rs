//! Gate event timestamp decoding
//!
//! Gates with a synchronized clock embed an ISO-8601 timestamp in the
//! detection payload; older firmware just publishes the detection token.
//! Decoding never fails - anything unparseable falls back to receipt time.

use chrono::{DateTime, NaiveDateTime, Utc};

/// A decoded gate timestamp, with a flag telling whether the payload
/// actually carried one or the receipt time was substituted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedTimestamp {
    pub at: DateTime<Utc>,
    pub parsed: bool,
}

/// Decode a raw gate payload into a point in time.
///
/// Accepts RFC 3339 (`2024-05-03T14:01:02.345Z`, with or without offset)
/// and naive ISO-8601 (`2024-05-03T14:01:02.345`, naive times are taken
/// as UTC). Everything else, including the bare detection token, yields
/// `received_at` with `parsed = false`.
pub fn decode_timestamp(raw: &str, received_at: DateTime<Utc>) -> DecodedTimestamp {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return DecodedTimestamp {
            at: dt.with_timezone(&Utc),
            parsed: true,
        };
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return DecodedTimestamp {
                at: naive.and_utc(),
                parsed: true,
            };
        }
    }

    DecodedTimestamp {
        at: received_at,
        parsed: false,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn receipt() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_rfc3339_with_z() {
        let decoded = decode_timestamp("2024-05-03T14:01:02.345Z", receipt());
        assert!(decoded.parsed);
        assert_eq!(
            decoded.at,
            Utc.with_ymd_and_hms(2024, 5, 3, 14, 1, 2).unwrap()
                + chrono::Duration::milliseconds(345)
        );
    }

    #[test]
    fn test_decode_rfc3339_with_offset() {
        let decoded = decode_timestamp("2024-05-03T14:01:02+02:00", receipt());
        assert!(decoded.parsed);
        assert_eq!(decoded.at, Utc.with_ymd_and_hms(2024, 5, 3, 12, 1, 2).unwrap());
    }

    #[test]
    fn test_decode_naive_iso() {
        let decoded = decode_timestamp("2024-05-03T14:01:02.500", receipt());
        assert!(decoded.parsed);
        assert_eq!(
            decoded.at,
            Utc.with_ymd_and_hms(2024, 5, 3, 14, 1, 2).unwrap()
                + chrono::Duration::milliseconds(500)
        );
    }

    #[test]
    fn test_decode_naive_space_separated() {
        let decoded = decode_timestamp("2024-05-03 14:01:02", receipt());
        assert!(decoded.parsed);
        assert_eq!(decoded.at, Utc.with_ymd_and_hms(2024, 5, 3, 14, 1, 2).unwrap());
    }

    #[test]
    fn test_decode_detection_token_falls_back() {
        let decoded = decode_timestamp("object_detected", receipt());
        assert!(!decoded.parsed);
        assert_eq!(decoded.at, receipt());
    }

    #[test]
    fn test_decode_garbage_falls_back() {
        for raw in ["", "not-a-time", "2024-13-90T99:99:99", "12345"] {
            let decoded = decode_timestamp(raw, receipt());
            assert!(!decoded.parsed, "{raw:?} should not parse");
            assert_eq!(decoded.at, receipt());
        }
    }

    #[test]
    fn test_decode_trims_whitespace() {
        let decoded = decode_timestamp("  2024-05-03T14:01:02Z\n", receipt());
        assert!(decoded.parsed);
    }
}
