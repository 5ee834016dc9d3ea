//! Duration parsing utilities.
//!
//! Measurement timestamps and interval sizes are integer nanoseconds. This
//! module converts command-line duration strings (e.g., "100ms", "5s") to
//! nanoseconds and back to the shortest exact textual form.

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Parse a duration string to nanoseconds.
///
/// Supported suffixes:
/// - Nanoseconds: "250ns"
/// - Microseconds: "10us"
/// - Milliseconds: "100ms"
/// - Seconds: "5s", "5sec"
/// - Minutes: "2m", "2min"
/// - Hours: "1h"
///
/// A unit is required; bare numbers are rejected because the default unit
/// would be ambiguous.
///
/// # Examples
/// ```
/// use neutralsim::utils::duration::parse_duration_to_nanos;
///
/// assert_eq!(parse_duration_to_nanos("100ms"), Ok(100_000_000));
/// assert_eq!(parse_duration_to_nanos("5s"), Ok(5_000_000_000));
/// assert!(parse_duration_to_nanos("5").is_err());
/// ```
pub fn parse_duration_to_nanos(duration: &str) -> Result<u64, String> {
    let duration = duration.trim();
    let digits = extract_number_part(duration);
    let unit = &duration[digits.len()..];

    // Check longer suffixes before shorter ones
    let multiplier = match unit {
        "ns" => 1,
        "us" => NANOS_PER_MICRO,
        "ms" => NANOS_PER_MILLI,
        "s" | "sec" => NANOS_PER_SECOND,
        "m" | "min" => 60 * NANOS_PER_SECOND,
        "h" => 3600 * NANOS_PER_SECOND,
        _ => return Err(format!("Invalid duration format: {}", duration)),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("Invalid duration format: {}", duration))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Duration out of range: {}", duration))
}

/// Format nanoseconds with the largest unit that represents them exactly.
pub fn format_nanos(value: u64) -> String {
    if value == 0 {
        "0ns".to_string()
    } else if value % NANOS_PER_SECOND == 0 {
        format!("{}s", value / NANOS_PER_SECOND)
    } else if value % NANOS_PER_MILLI == 0 {
        format!("{}ms", value / NANOS_PER_MILLI)
    } else if value % NANOS_PER_MICRO == 0 {
        format!("{}us", value / NANOS_PER_MICRO)
    } else {
        format!("{}ns", value)
    }
}

/// Extract the numeric part from a duration string by finding the first non-digit character
fn extract_number_part(duration: &str) -> &str {
    let end = duration
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(duration.len());
    &duration[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_nanos() {
        assert_eq!(parse_duration_to_nanos("250ns"), Ok(250));
        assert_eq!(parse_duration_to_nanos("10us"), Ok(10_000));
        assert_eq!(parse_duration_to_nanos("100ms"), Ok(100_000_000));
        assert_eq!(parse_duration_to_nanos("5s"), Ok(5_000_000_000));
        assert_eq!(parse_duration_to_nanos("5sec"), Ok(5_000_000_000));
        assert_eq!(parse_duration_to_nanos("2m"), Ok(120_000_000_000));
        assert_eq!(parse_duration_to_nanos("1h"), Ok(3_600_000_000_000));
        assert_eq!(parse_duration_to_nanos(" 0s "), Ok(0));

        assert!(parse_duration_to_nanos("").is_err());
        assert!(parse_duration_to_nanos("5").is_err());
        assert!(parse_duration_to_nanos("ms").is_err());
        assert!(parse_duration_to_nanos("5x").is_err());
        assert!(parse_duration_to_nanos("1.5s").is_err());
        assert!(parse_duration_to_nanos("99999999999999h").is_err());
    }

    #[test]
    fn test_format_nanos() {
        assert_eq!(format_nanos(0), "0ns");
        assert_eq!(format_nanos(5_000_000_000), "5s");
        assert_eq!(format_nanos(100_000_000), "100ms");
        assert_eq!(format_nanos(1_500_000_000), "1500ms");
        assert_eq!(format_nanos(2_000), "2us");
        assert_eq!(format_nanos(1_001), "1001ns");
    }
}
