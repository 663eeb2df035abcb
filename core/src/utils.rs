// Utility functions used across the codebase
// Centralized to avoid duplication

/// Parse a rational string like `"30000/1001"` or `"1/1000"` into a float
///
/// Returns None when the string is not a well-formed rational or the
/// denominator is zero.
pub fn parse_rational(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

/// Parse a timemark in HH:MM:SS.MS format to seconds
///
/// # Arguments
/// * `time_str` - Time string like "00:01:23.45"
///
/// # Returns
/// Time in seconds as f64
pub fn parse_time_to_seconds(time_str: &str) -> f64 {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() == 3 {
        let hours: f64 = parts[0].parse().unwrap_or(0.0);
        let minutes: f64 = parts[1].parse().unwrap_or(0.0);
        let seconds: f64 = parts[2].parse().unwrap_or(0.0);
        hours * 3600.0 + minutes * 60.0 + seconds
    } else {
        0.0
    }
}

/// Format a duration in seconds as `d[d] HH:mm:ss`
///
/// Non-finite or negative values render as `--:--:--`.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "--:--:--".to_string();
    }

    let total = seconds as u64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rational() {
        assert_eq!(parse_rational("24/1"), Some(24.0));
        assert_eq!(parse_rational("1/1000"), Some(0.001));
        assert_eq!(parse_rational("30000/1001").map(|v| (v * 100.0).round()), Some(2997.0));
        assert_eq!(parse_rational("oops"), None);
        assert_eq!(parse_rational("1/0"), None);
    }

    #[test]
    fn test_parse_time_to_seconds() {
        assert_eq!(parse_time_to_seconds("00:01:23.45"), 83.45);
        assert_eq!(parse_time_to_seconds("01:00:00.00"), 3600.0);
        assert_eq!(parse_time_to_seconds("00:00:30.50"), 30.5);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(83.0), "00:01:23");
        assert_eq!(format_duration(3600.0), "01:00:00");
        assert_eq!(format_duration(90_061.0), "1d 01:01:01");
        assert_eq!(format_duration(f64::INFINITY), "--:--:--");
        assert_eq!(format_duration(-5.0), "--:--:--");
    }
}
