//! Cron expression parsing and matching
//!
//! Supports five-field expressions of the form `MIN HOUR DOM MON DOW`, the
//! `*/N` shorthand (expanded to `*/N * * * *`), and a table of named
//! aliases. Matching is at minute resolution; seconds are ignored.
//!
//! Day-of-week numbering follows the cron tradition: 0 = Sunday.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::fmt;

use crate::error::{Error, Result};

/// Named shorthands for common schedules
pub const ALIASES: &[(&str, &str)] = &[
    ("every_minute", "* * * * *"),
    ("every_5_minutes", "*/5 * * * *"),
    ("every_10_minutes", "*/10 * * * *"),
    ("every_15_minutes", "*/15 * * * *"),
    ("every_30_minutes", "*/30 * * * *"),
    ("hourly", "0 * * * *"),
    ("daily", "0 0 * * *"),
    ("weekly", "0 0 * * 0"),
    ("monthly", "0 0 1 * *"),
];

/// Look up a named alias
pub fn alias(name: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, expr)| *expr)
}

/// One field of a cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    /// `*`: any value in the domain
    Any,

    /// `N`: exact value
    Exact(u32),

    /// `*/N`: values divisible by N
    Step(u32),

    /// `A-B`: inclusive range
    Range(u32, u32),

    /// `A,B,C`: explicit list
    List(Vec<u32>),
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Exact(n) => value == *n,
            CronField::Step(n) => value % n == 0,
            CronField::Range(start, end) => (*start..=*end).contains(&value),
            CronField::List(values) => values.contains(&value),
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronField::Any => write!(f, "*"),
            CronField::Exact(n) => write!(f, "{n}"),
            CronField::Step(n) => write!(f, "*/{n}"),
            CronField::Range(start, end) => write!(f, "{start}-{end}"),
            CronField::List(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

/// Inclusive value domain of one cron field
struct FieldDomain {
    name: &'static str,
    min: u32,
    max: u32,
}

const DOMAINS: [FieldDomain; 5] = [
    FieldDomain { name: "minute", min: 0, max: 59 },
    FieldDomain { name: "hour", min: 0, max: 23 },
    FieldDomain { name: "day of month", min: 1, max: 31 },
    FieldDomain { name: "month", min: 1, max: 12 },
    FieldDomain { name: "day of week", min: 0, max: 6 },
];

/// A parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    /// Parse a cron expression, the `*/N` shorthand, or a named alias
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();

        let expanded = if let Some(full) = alias(expr) {
            full.to_string()
        } else if !expr.contains(char::is_whitespace) && expr.starts_with("*/") {
            format!("{expr} * * * *")
        } else {
            expr.to_string()
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::InvalidCronExpression(expr.to_string()));
        }

        let mut parsed = Vec::with_capacity(5);
        for (raw, domain) in fields.iter().zip(DOMAINS.iter()) {
            parsed.push(parse_field(raw, domain).map_err(|_| {
                Error::InvalidCronExpression(format!("{expr} (bad {} field)", domain.name))
            })?);
        }

        let [minute, hour, day_of_month, month, day_of_week]: [CronField; 5] = parsed
            .try_into()
            .map_err(|_| Error::InvalidCronExpression(expr.to_string()))?;

        Ok(Self {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }

    /// Check whether the schedule matches an instant, at minute resolution
    pub fn matches(&self, now: DateTime<Utc>) -> bool {
        self.minute.matches(now.minute())
            && self.hour.matches(now.hour())
            && self.day_of_month.matches(now.day())
            && self.month.matches(now.month())
            && self.day_of_week.matches(now.weekday().num_days_from_sunday())
    }
}

impl fmt::Display for CronSchedule {
    /// Canonical five-field form; re-parsing it preserves semantics
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }
}

fn parse_field(raw: &str, domain: &FieldDomain) -> std::result::Result<CronField, ()> {
    if raw == "*" {
        return Ok(CronField::Any);
    }

    if let Some(step) = raw.strip_prefix("*/") {
        let n: u32 = step.parse().map_err(|_| ())?;
        if n == 0 {
            return Err(());
        }
        return Ok(CronField::Step(n));
    }

    if let Some((start, end)) = raw.split_once('-') {
        let start: u32 = start.parse().map_err(|_| ())?;
        let end: u32 = end.parse().map_err(|_| ())?;
        if start > end || !in_domain(start, domain) || !in_domain(end, domain) {
            return Err(());
        }
        return Ok(CronField::Range(start, end));
    }

    if raw.contains(',') {
        let mut values = Vec::new();
        for part in raw.split(',') {
            let value: u32 = part.parse().map_err(|_| ())?;
            if !in_domain(value, domain) {
                return Err(());
            }
            values.push(value);
        }
        return Ok(CronField::List(values));
    }

    let value: u32 = raw.parse().map_err(|_| ())?;
    if !in_domain(value, domain) {
        return Err(());
    }
    Ok(CronField::Exact(value))
}

fn in_domain(value: u32, domain: &FieldDomain) -> bool {
    value >= domain.min && value <= domain.max
}

/// Validate a cron expression without keeping the parse
pub fn is_valid(expr: &str) -> bool {
    CronSchedule::parse(expr).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        // 2024-01-01 was a Monday
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_parse_full_expression() {
        let schedule = CronSchedule::parse("0 12 * * *").unwrap();
        assert!(schedule.matches(at(12, 0)));
        assert!(!schedule.matches(at(12, 1)));
        assert!(!schedule.matches(at(13, 0)));
    }

    #[test]
    fn test_shorthand_expansion() {
        let schedule = CronSchedule::parse("*/10").unwrap();
        assert_eq!(schedule.to_string(), "*/10 * * * *");
        assert!(schedule.matches(at(7, 50)));
        assert!(!schedule.matches(at(7, 55)));
    }

    #[test]
    fn test_every_five_minutes() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        assert!(schedule.matches(at(12, 5)));
        assert!(!schedule.matches(at(12, 6)));
        assert!(schedule.matches(at(12, 10)));
        assert!(schedule.matches(at(12, 0)));
    }

    #[test]
    fn test_range_and_list() {
        let schedule = CronSchedule::parse("10-20 * * * *").unwrap();
        assert!(schedule.matches(at(3, 10)));
        assert!(schedule.matches(at(3, 20)));
        assert!(!schedule.matches(at(3, 21)));

        let schedule = CronSchedule::parse("5,10,15 * * * *").unwrap();
        assert!(schedule.matches(at(3, 10)));
        assert!(!schedule.matches(at(3, 11)));
    }

    #[test]
    fn test_day_of_week_is_sunday_based() {
        // weekly alias fires on Sunday midnight; 2024-01-07 was a Sunday
        let schedule = CronSchedule::parse("weekly").unwrap();
        let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        assert!(schedule.matches(sunday));
        assert!(!schedule.matches(monday));
    }

    #[test]
    fn test_seconds_are_ignored() {
        let schedule = CronSchedule::parse("0 12 * * *").unwrap();
        let with_seconds = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 42).unwrap();
        assert!(schedule.matches(with_seconds));
    }

    #[test]
    fn test_aliases() {
        assert_eq!(alias("hourly"), Some("0 * * * *"));
        assert_eq!(alias("monthly"), Some("0 0 1 * *"));
        assert_eq!(alias("never"), None);

        for (name, expr) in ALIASES {
            let from_alias = CronSchedule::parse(name).unwrap();
            let from_expr = CronSchedule::parse(expr).unwrap();
            assert_eq!(from_alias, from_expr);
        }
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in [
            "",
            "not a cron",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * 32 * *",
            "* * * 13 *",
            "* * * * 7",
            "*/0 * * * *",
            "20-10 * * * *",
            "1,2,x * * * *",
        ] {
            assert!(
                CronSchedule::parse(expr).is_err(),
                "expected parse failure for {expr:?}"
            );
        }
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("*/5 * * * *"));
        assert!(!is_valid("invalid"));
    }

    #[test]
    fn test_canonical_form_preserves_semantics() {
        let instants: Vec<DateTime<Utc>> = (0..60)
            .map(|m| Utc.with_ymd_and_hms(2024, 3, 17, 9, m, 0).unwrap())
            .collect();

        for expr in ["*/5", "0 9 * * 0", "1-9 * * * *", "0,15,30,45 * * * *"] {
            let parsed = CronSchedule::parse(expr).unwrap();
            let reparsed = CronSchedule::parse(&parsed.to_string()).unwrap();
            for &t in &instants {
                assert_eq!(parsed.matches(t), reparsed.matches(t), "diverged on {expr}");
            }
        }
    }
}
