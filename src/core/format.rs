//! Formatting utilities for race data display.

/// Format an elapsed duration in seconds as `12.345 s`.
pub fn format_seconds(seconds: f64) -> String {
    format!("{:.3} s", seconds.max(0.0))
}

/// Format a finish-gate delta: `0.400 s`, or `N/A` when only one finish
/// gate has fired.
pub fn format_delta(delta: Option<f64>) -> String {
    match delta {
        Some(seconds) => format_seconds(seconds),
        None => "N/A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(10.4), "10.400 s");
    }

    #[test]
    fn test_format_seconds_rounds() {
        assert_eq!(format_seconds(1.23456), "1.235 s");
    }

    #[test]
    fn test_format_seconds_negative_clamped() {
        // Edge case: clock skew (shouldn't normally happen)
        assert_eq!(format_seconds(-0.5), "0.000 s");
    }

    #[test]
    fn test_format_delta_present() {
        assert_eq!(format_delta(Some(0.4)), "0.400 s");
    }

    #[test]
    fn test_format_delta_absent() {
        assert_eq!(format_delta(None), "N/A");
    }
}
