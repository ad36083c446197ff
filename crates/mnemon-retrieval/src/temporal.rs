use chrono::{DateTime, Duration, Utc};
use mnemon_types::TimeRange;
use once_cell::sync::Lazy;
use regex::Regex;

static AGO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+(minutes?|hours?|days?|weeks?|months?)\s+ago\b").unwrap()
});

/// Parse a natural-language time expression out of a query.
///
/// Returns the implied valid-time interval and a confidence; the
/// engine only applies the filter above its confidence threshold.
pub fn parse_temporal(query: &str, now: DateTime<Utc>) -> Option<(TimeRange, f64)> {
    let lower = query.to_lowercase();

    if let Some(captures) = AGO.captures(&lower) {
        let amount: i64 = captures[1].parse().ok()?;
        let unit = &captures[2];
        let span = match unit.trim_end_matches('s') {
            "minute" => Duration::minutes(amount),
            "hour" => Duration::hours(amount),
            "day" => Duration::days(amount),
            "week" => Duration::weeks(amount),
            "month" => Duration::days(30 * amount),
            _ => return None,
        };
        // "3 days ago" reads as that day, give or take one unit
        let anchor = now - span;
        let slack = match unit.trim_end_matches('s') {
            "minute" => Duration::minutes(30),
            "hour" => Duration::hours(1),
            _ => Duration::days(1),
        };
        return Some((
            TimeRange {
                start: anchor - slack,
                end: anchor + slack,
            },
            0.85,
        ));
    }

    if lower.contains("today") {
        return Some((
            TimeRange {
                start: now - Duration::hours(24),
                end: now,
            },
            0.9,
        ));
    }
    if lower.contains("yesterday") {
        return Some((
            TimeRange {
                start: now - Duration::hours(48),
                end: now - Duration::hours(24),
            },
            0.9,
        ));
    }
    if lower.contains("last week") {
        return Some((
            TimeRange {
                start: now - Duration::weeks(2),
                end: now - Duration::weeks(1),
            },
            0.8,
        ));
    }
    if lower.contains("this week") {
        return Some((
            TimeRange {
                start: now - Duration::weeks(1),
                end: now,
            },
            0.7,
        ));
    }
    if lower.contains("last month") {
        return Some((
            TimeRange {
                start: now - Duration::days(60),
                end: now - Duration::days(30),
            },
            0.8,
        ));
    }
    if lower.contains("recent") {
        return Some((
            TimeRange {
                start: now - Duration::days(7),
                end: now,
            },
            0.5,
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_days_ago() {
        let now = Utc::now();
        let (range, confidence) = parse_temporal("what failed 3 days ago", now).unwrap();
        assert!(confidence > 0.8);
        assert!(range.start < now - Duration::days(2));
        assert!(range.end > now - Duration::days(4));
    }

    #[test]
    fn test_named_expressions() {
        let now = Utc::now();
        assert!(parse_temporal("changes today", now).unwrap().1 >= 0.9);
        assert!(parse_temporal("what broke yesterday", now).is_some());
        assert!(parse_temporal("decisions from last week", now).is_some());
    }

    #[test]
    fn test_low_confidence_for_vague_phrases() {
        let now = Utc::now();
        let (_, confidence) = parse_temporal("recent design decisions", now).unwrap();
        assert!(confidence < 0.7);
    }

    #[test]
    fn test_no_temporal_phrase() {
        assert!(parse_temporal("how does fusion work", Utc::now()).is_none());
    }
}
