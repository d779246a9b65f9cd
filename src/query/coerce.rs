use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::error::QueryError;
use super::types::{TypeTag, TypedValue};

static DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("static regex"));
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").expect("static regex"));

const TRUTHY: [&str; 5] = ["1", "true", "yes", "y", "on"];

const DATETIME_FORMATS: [&str; 9] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: [&str; 9] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
    "%Y%m%d",
];

/// Turns a raw form string plus its declared type into a typed value
pub struct ValueCoercer;

impl ValueCoercer {
    pub fn coerce(raw: &str, tag: TypeTag) -> Result<TypedValue, QueryError> {
        Self::coerce_at(raw, tag, Utc::now())
    }

    /// Same as `coerce`, with relative dates resolved against `now`
    pub fn coerce_at(raw: &str, tag: TypeTag, now: DateTime<Utc>) -> Result<TypedValue, QueryError> {
        match tag {
            TypeTag::String => Ok(TypedValue::String(raw.to_string())),
            TypeTag::Number => Self::number(raw),
            TypeTag::Bool => {
                let lowered = raw.trim().to_ascii_lowercase();
                Ok(TypedValue::Bool(TRUTHY.contains(&lowered.as_str())))
            }
            TypeTag::Null => Ok(TypedValue::Null),
            TypeTag::Date => parse_datetime(raw, now)
                .map(TypedValue::Date)
                .ok_or_else(|| QueryError::invalid_value("date", format!("cannot parse '{}' as a date", raw))),
            TypeTag::Identifier => Self::identifier(raw),
        }
    }

    fn number(raw: &str) -> Result<TypedValue, QueryError> {
        let trimmed = raw.trim();
        if !DECIMAL.is_match(trimmed) {
            return Err(QueryError::invalid_value("number", format!("'{}' is not a decimal number", raw)));
        }

        if INTEGER.is_match(trimmed) {
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(TypedValue::Integer(i));
            }
        }

        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(TypedValue::Float(f)),
            _ => Err(QueryError::invalid_value("number", format!("'{}' is out of range", raw))),
        }
    }

    fn identifier(raw: &str) -> Result<TypedValue, QueryError> {
        let trimmed = raw.trim();
        if trimmed.len() == 24 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(TypedValue::Identifier(trimmed.to_ascii_lowercase()))
        } else {
            Err(QueryError::invalid_value(
                "identifier",
                format!("'{}' is not a 24-digit hexadecimal identifier", raw),
            ))
        }
    }
}

/// Free-form date parsing: absolute formats, keywords and relative offsets.
/// Inputs without a zone are taken as UTC.
pub fn parse_datetime(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let input = raw.trim();
    if input.is_empty() {
        return None;
    }
    let lowered = input.to_ascii_lowercase();

    match lowered.as_str() {
        "now" => return Some(now),
        "today" => return midnight(now),
        "yesterday" => return midnight(now - Duration::days(1)),
        "tomorrow" => return midnight(now + Duration::days(1)),
        _ => {}
    }

    if let Some(secs) = lowered.strip_prefix('@') {
        return secs.parse::<i64>().ok().and_then(|s| DateTime::<Utc>::from_timestamp(s, 0));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    parse_relative(&lowered, now)
}

fn midnight(dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
    dt.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_relative(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    match tokens.as_slice() {
        ["next", unit] => shift(now, 1, unit),
        ["last", unit] => shift(now, -1, unit),
        [amount, unit, "ago"] => shift(now, -amount.parse::<i64>().ok()?.abs(), unit),
        [amount, unit] => shift(now, amount.trim_start_matches('+').parse::<i64>().ok()?, unit),
        _ => None,
    }
}

fn shift(now: DateTime<Utc>, amount: i64, unit: &str) -> Option<DateTime<Utc>> {
    let unit = unit.strip_suffix('s').unwrap_or(unit);
    let fixed = match unit {
        "sec" | "second" => Some(Duration::try_seconds(amount)?),
        "min" | "minute" => Some(Duration::try_minutes(amount)?),
        "hour" => Some(Duration::try_hours(amount)?),
        "day" => Some(Duration::try_days(amount)?),
        "week" => Some(Duration::try_weeks(amount)?),
        _ => None,
    };
    if let Some(delta) = fixed {
        return now.checked_add_signed(delta);
    }

    let months = match unit {
        "month" => amount,
        "year" => amount.checked_mul(12)?,
        _ => return None,
    };
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        now.checked_add_months(magnitude)
    } else {
        now.checked_sub_months(magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap()
    }

    #[test]
    fn numbers_keep_integer_and_fraction_apart() {
        assert_eq!(ValueCoercer::coerce("18", TypeTag::Number).unwrap(), TypedValue::Integer(18));
        assert_eq!(ValueCoercer::coerce("-2.5", TypeTag::Number).unwrap(), TypedValue::Float(-2.5));
        assert_eq!(ValueCoercer::coerce("1.0", TypeTag::Number).unwrap(), TypedValue::Float(1.0));
        assert_eq!(ValueCoercer::coerce(" 7 ", TypeTag::Number).unwrap(), TypedValue::Integer(7));
    }

    #[test]
    fn non_numerals_are_rejected() {
        for bad in ["", "abc", "12abc", "NaN", "inf", "1,000", "0x1f", "--1"] {
            assert!(
                matches!(ValueCoercer::coerce(bad, TypeTag::Number), Err(QueryError::InvalidValue { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn bool_never_fails() {
        for yes in ["1", "TRUE", "Yes", "y", "on"] {
            assert_eq!(ValueCoercer::coerce(yes, TypeTag::Bool).unwrap(), TypedValue::Bool(true));
        }
        for no in ["0", "false", "off", "nope", ""] {
            assert_eq!(ValueCoercer::coerce(no, TypeTag::Bool).unwrap(), TypedValue::Bool(false));
        }
    }

    #[test]
    fn null_ignores_input() {
        assert_eq!(ValueCoercer::coerce("whatever", TypeTag::Null).unwrap(), TypedValue::Null);
    }

    #[test]
    fn identifiers_are_24_hex_digits() {
        assert_eq!(
            ValueCoercer::coerce("507F1F77BCF86CD799439011", TypeTag::Identifier).unwrap(),
            TypedValue::Identifier("507f1f77bcf86cd799439011".into())
        );
        assert!(ValueCoercer::coerce("507f1f77bcf86cd79943901", TypeTag::Identifier).is_err());
        assert!(ValueCoercer::coerce("507f1f77bcf86cd79943901z", TypeTag::Identifier).is_err());
    }

    #[test]
    fn absolute_dates_parse() {
        let now = fixed_now();
        let expect = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        for raw in ["2024-01-02", "2024/01/02", "01/02/2024", "02.01.2024", "January 2, 2024", "2 Jan 2024"] {
            assert_eq!(parse_datetime(raw, now), Some(expect), "{}", raw);
        }
        assert_eq!(
            parse_datetime("2024-01-02 03:04:05", now),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
        assert_eq!(
            parse_datetime("2024-01-02T03:04:05+02:00", now),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 1, 4, 5).unwrap())
        );
        assert_eq!(parse_datetime("@0", now), Some(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn relative_dates_resolve_against_now() {
        let now = fixed_now();
        assert_eq!(parse_datetime("now", now), Some(now));
        assert_eq!(parse_datetime("today", now), Some(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()));
        assert_eq!(parse_datetime("yesterday", now), Some(Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap()));
        assert_eq!(parse_datetime("+3 days", now), Some(now + Duration::days(3)));
        assert_eq!(parse_datetime("2 weeks ago", now), Some(now - Duration::weeks(2)));
        assert_eq!(parse_datetime("-1 hour", now), Some(now - Duration::hours(1)));
        assert_eq!(parse_datetime("next month", now), Some(Utc.with_ymd_and_hms(2024, 4, 15, 12, 30, 0).unwrap()));
        assert_eq!(parse_datetime("last year", now), Some(Utc.with_ymd_and_hms(2023, 3, 15, 12, 30, 0).unwrap()));
    }

    #[test]
    fn unparsable_dates_fail() {
        for bad in ["", "someday", "2024-13-45", "3 fortnights ago"] {
            assert!(ValueCoercer::coerce_at(bad, TypeTag::Date, fixed_now()).is_err(), "{}", bad);
        }
    }

    #[test]
    fn coerced_values_round_trip() {
        let now = fixed_now();
        let cases = [
            ("hello world", TypeTag::String),
            ("42", TypeTag::Number),
            ("-0.125", TypeTag::Number),
            ("3.0", TypeTag::Number),
            ("6.02e23", TypeTag::Number),
            ("99999999999999999999", TypeTag::Number),
            ("yes", TypeTag::Bool),
            ("nope", TypeTag::Bool),
            ("2024-01-02 03:04:05.250", TypeTag::Date),
            ("3 days ago", TypeTag::Date),
            ("507f1f77bcf86cd799439011", TypeTag::Identifier),
        ];
        for (raw, tag) in cases {
            let first = ValueCoercer::coerce_at(raw, tag, now).unwrap();
            let second = ValueCoercer::coerce_at(&first.to_raw(), tag, now).unwrap();
            assert_eq!(first, second, "{} ({})", raw, tag);
        }
    }
}
