//! Time display formatting
//!
//! The timestamped transcript artifact renders segment boundaries as
//! `HH:MM:SS`; hours grow past two digits rather than wrapping.

/// Format a second count as `HH:MM:SS`.
///
/// Fractional seconds are truncated; negative inputs clamp to zero.
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Render a `[HH:MM:SS - HH:MM:SS]` range prefix for a transcript block.
pub fn format_range(start_seconds: f64, end_seconds: f64) -> String {
    format!(
        "[{} - {}]",
        format_hms(start_seconds),
        format_hms(end_seconds)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_basic_values() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(61.0), "00:01:01");
        assert_eq!(format_hms(3661.9), "01:01:01");
        assert_eq!(format_hms(45296.0), "12:34:56");
    }

    #[test]
    fn hours_extend_past_one_day() {
        assert_eq!(format_hms(90000.0), "25:00:00");
    }

    #[test]
    fn degenerate_inputs_clamp_to_zero() {
        assert_eq!(format_hms(-5.0), "00:00:00");
        assert_eq!(format_hms(f64::NAN), "00:00:00");
    }

    #[test]
    fn range_prefix() {
        assert_eq!(format_range(0.0, 300.0), "[00:00:00 - 00:05:00]");
    }
}
