//! Retry interval parsing
//!
//! Accepted forms: `HH:MM:SS`, `D.HH:MM:SS` (either may carry fractional
//! seconds) and a bare number of seconds.

use chrono::Duration;

pub fn parse_retry_interval(raw: &str) -> Result<Duration, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("retry interval is empty".to_string());
    }

    if !value.contains(':') {
        let seconds: f64 = value
            .parse()
            .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
        return seconds_to_duration(seconds, raw);
    }

    let (days, clock) = match value.split_once('.') {
        Some((days, rest)) if !days.contains(':') => {
            let days: u32 = days
                .parse()
                .map_err(|_| format!("'{raw}' has an invalid day component"))?;
            (days, rest)
        }
        _ => (0, value),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(format!("'{raw}' must have the form HH:MM:SS"));
    };
    let hours: u32 = hours
        .parse()
        .map_err(|_| format!("'{raw}' has invalid hours"))?;
    let minutes: u32 = minutes
        .parse()
        .map_err(|_| format!("'{raw}' has invalid minutes"))?;
    let seconds: f64 = seconds
        .parse()
        .map_err(|_| format!("'{raw}' has invalid seconds"))?;
    if hours >= 24 || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return Err(format!("'{raw}' has a component out of range"));
    }

    let total = f64::from(days) * 86_400.0
        + f64::from(hours) * 3_600.0
        + f64::from(minutes) * 60.0
        + seconds;
    seconds_to_duration(total, raw)
}

fn seconds_to_duration(seconds: f64, raw: &str) -> Result<Duration, String> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("'{raw}' is not a non-negative duration"));
    }
    Ok(Duration::milliseconds((seconds * 1000.0).round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_clock_forms() {
        assert_eq!(parse_retry_interval("00:01:00").unwrap(), Duration::seconds(60));
        assert_eq!(parse_retry_interval("01:00:30").unwrap(), Duration::seconds(3630));
        assert_eq!(
            parse_retry_interval("1.02:00:00").unwrap(),
            Duration::seconds(86_400 + 7_200)
        );
        assert_eq!(
            parse_retry_interval("00:00:01.5").unwrap(),
            Duration::milliseconds(1500)
        );
    }

    #[test]
    fn test_seconds_form() {
        assert_eq!(parse_retry_interval("30").unwrap(), Duration::seconds(30));
        assert_eq!(parse_retry_interval(" 0 ").unwrap(), Duration::zero());
    }

    #[test]
    fn test_rejects_malformed() {
        for raw in ["", "abc", "1:2", "00:60:00", "25:00:00", "-5", "x.00:00:10", "00:00:xx"] {
            assert!(parse_retry_interval(raw).is_err(), "{raw} should be rejected");
        }
    }

    proptest! {
        #[test]
        fn clock_form_matches_components(h in 0u32..24, m in 0u32..60, s in 0u32..60) {
            let raw = format!("{h:02}:{m:02}:{s:02}");
            let expected = Duration::seconds(i64::from(h * 3600 + m * 60 + s));
            prop_assert_eq!(parse_retry_interval(&raw).unwrap(), expected);
        }
    }
}
