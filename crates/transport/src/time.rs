/// Gain factor for a level in decibels.
#[inline]
pub fn db_to_ratio(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Beat length in seconds at `bpm`.
#[inline]
pub fn bpm_to_time(bpm: f64) -> f64 {
    60.0 / bpm
}

/// Tempo of a beat lasting `seconds`.
#[inline]
pub fn time_to_bpm(seconds: f64) -> f64 {
    60.0 / seconds
}

/// Parse `m:ss.fff` or plain seconds.
///
/// ```
/// use beatmix_transport::parse_clock;
///
/// assert_eq!(parse_clock("1:30.5"), Some(90.5));
/// assert_eq!(parse_clock("12.25"), Some(12.25));
/// assert_eq!(parse_clock("x:10"), None);
/// ```
pub fn parse_clock(text: &str) -> Option<f64> {
    let text = text.trim();
    match text.split_once(':') {
        None => text.parse().ok(),
        Some((minutes, seconds)) => {
            let minutes: i64 = minutes.parse().ok()?;
            let seconds: f64 = seconds.parse().ok()?;
            Some(minutes as f64 * 60.0 + seconds)
        }
    }
}

/// Format seconds as `m:ss.fff`.
pub fn format_clock(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let seconds = seconds.abs();
    let minutes = (seconds / 60.0).floor();
    format!("{sign}{}:{:06.3}", minutes as u64, seconds - minutes * 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_ratio() {
        assert!((db_to_ratio(0.0) - 1.0).abs() < 1e-12);
        assert!((db_to_ratio(-6.0) - 0.501_187).abs() < 1e-6);
        assert!((db_to_ratio(20.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_bpm_conversions() {
        assert_eq!(bpm_to_time(120.0), 0.5);
        assert_eq!(time_to_bpm(0.5), 120.0);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(90.5), "1:30.500");
        assert_eq!(format_clock(5.0), "0:05.000");
        assert_eq!(format_clock(-61.25), "-1:01.250");
    }

    #[test]
    fn test_parse_clock_rejects_garbage() {
        assert_eq!(parse_clock(""), None);
        assert_eq!(parse_clock("1:xx"), None);
        assert_eq!(parse_clock(" 2:00 "), Some(120.0));
    }
}
