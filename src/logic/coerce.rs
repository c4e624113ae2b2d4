//! Conversion of submitted scalars into typed attribute values.

use chrono::{NaiveDate, NaiveDateTime};

use crate::model::{AttributeValue, ScalarKind, SubmittedValue};

const DATE_TIME_FORMATS: [&str; 8] = [
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%d/%m/%Y", "%Y-%m-%d"];

/// Parses the supported date/time literals. Empty input yields `None`.
///
/// ISO-8601 strings with a `T` separator are truncated to whole seconds and
/// any offset is dropped.
pub fn parse_date_time(raw: &str) -> Result<Option<NaiveDateTime>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let candidate = if raw.contains('T') {
        raw.get(..19).unwrap_or(raw)
    } else {
        raw
    };

    for format in DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(candidate, format) {
            return Ok(Some(parsed));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(Some(midnight));
            }
        }
    }

    Err(format!("unrecognised date format: {}", raw))
}

/// Date input either as a string or as a `{date: ...}` structure.
pub fn date_input(value: &SubmittedValue) -> Option<&str> {
    match value {
        SubmittedValue::Scalar(s) => Some(s),
        SubmittedValue::Map(_) => value.get("date").and_then(|d| d.as_scalar()),
        _ => None,
    }
}

/// `"1.234,56"` -> `"1234.56"`; values without a comma are returned as-is.
pub fn normalize_locale_decimal(raw: &str) -> String {
    if raw.contains(',') {
        raw.replace('.', "").replace(',', ".")
    } else {
        raw.to_string()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" | "s" => Some(true),
        "0" | "false" | "off" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Converts a submitted value into the declared scalar kind.
///
/// Strings are trimmed first. An empty value is `Null` for every kind but
/// text. The error carries the reason the value was rejected.
pub fn coerce_scalar(kind: ScalarKind, value: &SubmittedValue) -> Result<AttributeValue, String> {
    if kind == ScalarKind::DateTime {
        let raw = date_input(value).ok_or_else(|| "expected a date".to_string())?;
        return Ok(parse_date_time(raw)?
            .map(AttributeValue::DateTime)
            .unwrap_or(AttributeValue::Null));
    }

    let raw = match value {
        SubmittedValue::Null => return Ok(AttributeValue::Null),
        SubmittedValue::Scalar(s) => s.trim(),
        _ => return Err("expected a scalar, got nested data".to_string()),
    };

    if raw.is_empty() {
        return Ok(match kind {
            ScalarKind::Text => AttributeValue::Text(String::new()),
            _ => AttributeValue::Null,
        });
    }

    match kind {
        ScalarKind::Text => Ok(AttributeValue::Text(raw.to_string())),
        ScalarKind::Integer => raw
            .parse::<i64>()
            .map(AttributeValue::Integer)
            .map_err(|_| "expected an integer".to_string()),
        ScalarKind::Decimal => normalize_locale_decimal(raw)
            .parse::<f64>()
            .map(AttributeValue::Decimal)
            .map_err(|_| "expected a decimal number".to_string()),
        ScalarKind::Boolean => parse_bool(raw)
            .map(AttributeValue::Bool)
            .ok_or_else(|| "expected a boolean".to_string()),
        ScalarKind::DateTime => Ok(parse_date_time(raw)?
            .map(AttributeValue::DateTime)
            .unwrap_or(AttributeValue::Null)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_supported_date_literals() {
        assert_eq!(parse_date_time("31/12/2020").unwrap(), Some(at(2020, 12, 31, 0, 0, 0)));
        assert_eq!(
            parse_date_time("31/12/2020 23:59:59").unwrap(),
            Some(at(2020, 12, 31, 23, 59, 59))
        );
        assert_eq!(parse_date_time("2020-12-31").unwrap(), Some(at(2020, 12, 31, 0, 0, 0)));
        assert_eq!(
            parse_date_time("2020-12-31 23:59:59").unwrap(),
            Some(at(2020, 12, 31, 23, 59, 59))
        );
        assert_eq!(
            parse_date_time("2020-12-31T23:59:59.000Z").unwrap(),
            Some(at(2020, 12, 31, 23, 59, 59))
        );
        assert_eq!(
            parse_date_time("2020-12-31T23:59:59+03:00").unwrap(),
            Some(at(2020, 12, 31, 23, 59, 59))
        );
    }

    #[test]
    fn test_fractional_seconds_are_accepted() {
        let parsed = parse_date_time("2020-12-31 23:59:59.250000").unwrap().unwrap();
        assert_eq!(parsed.format("%H:%M:%S%.3f").to_string(), "23:59:59.250");

        let parsed = parse_date_time("31/12/2020 08:00:00.5").unwrap().unwrap();
        assert_eq!(parsed.format("%H:%M:%S").to_string(), "08:00:00");
    }

    #[test]
    fn test_empty_date_is_null_and_garbage_is_rejected() {
        assert_eq!(parse_date_time("").unwrap(), None);
        assert_eq!(parse_date_time("   ").unwrap(), None);
        assert!(parse_date_time("31-12-2020").is_err());
        assert!(parse_date_time("tomorrow").is_err());
    }

    #[test]
    fn test_structured_date_shape() {
        let value = SubmittedValue::from_json(&json!({
            "date": "2020-12-31 10:00:00.000000",
            "timezone_type": 3,
            "timezone": "UTC"
        }));
        assert_eq!(
            coerce_scalar(ScalarKind::DateTime, &value).unwrap(),
            AttributeValue::DateTime(at(2020, 12, 31, 10, 0, 0))
        );
        assert_eq!(
            coerce_scalar(ScalarKind::DateTime, &SubmittedValue::scalar("")).unwrap(),
            AttributeValue::Null
        );
    }

    #[test]
    fn test_locale_decimals() {
        assert_eq!(normalize_locale_decimal("1.234,56"), "1234.56");
        assert_eq!(normalize_locale_decimal("2,50"), "2.50");
        assert_eq!(normalize_locale_decimal("3.75"), "3.75");

        assert_eq!(
            coerce_scalar(ScalarKind::Decimal, &SubmittedValue::scalar(" 1.234,56 ")).unwrap(),
            AttributeValue::Decimal(1234.56)
        );
        assert_eq!(
            coerce_scalar(ScalarKind::Decimal, &SubmittedValue::scalar("2,50")).unwrap(),
            AttributeValue::Decimal(2.5)
        );
    }

    #[test]
    fn test_scalar_kinds() {
        assert_eq!(
            coerce_scalar(ScalarKind::Text, &SubmittedValue::scalar("  hello ")).unwrap(),
            AttributeValue::Text("hello".into())
        );
        assert_eq!(
            coerce_scalar(ScalarKind::Integer, &SubmittedValue::scalar("42")).unwrap(),
            AttributeValue::Integer(42)
        );
        assert_eq!(
            coerce_scalar(ScalarKind::Integer, &SubmittedValue::scalar("")).unwrap(),
            AttributeValue::Null
        );
        assert_eq!(
            coerce_scalar(ScalarKind::Boolean, &SubmittedValue::scalar("on")).unwrap(),
            AttributeValue::Bool(true)
        );
        assert!(coerce_scalar(ScalarKind::Integer, &SubmittedValue::scalar("4x")).is_err());
        assert!(coerce_scalar(ScalarKind::Boolean, &SubmittedValue::scalar("maybe")).is_err());
        assert!(coerce_scalar(ScalarKind::Text, &SubmittedValue::empty_map()).is_err());
    }
}
