//! Strict field coercion over an operation payload

use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::collections::BTreeSet;

use super::ApplyError;
use crate::models::Payload;

/// Typed view over a JSON payload.
///
/// Every accessor names the offending field in its `ValidationError`.
pub struct PayloadReader<'a> {
    payload: &'a Payload,
}

impl<'a> PayloadReader<'a> {
    pub const fn new(payload: &'a Payload) -> Self {
        Self { payload }
    }

    /// Field is present, even if explicitly `null`
    pub fn contains(&self, field: &str) -> bool {
        self.payload.contains_key(field)
    }

    fn value(&self, field: &str) -> Option<&'a Value> {
        self.payload.get(field).filter(|value| !value.is_null())
    }

    /// Non-empty trimmed string
    pub fn required_text(&self, field: &str) -> Result<String, ApplyError> {
        self.optional_text(field)?
            .ok_or_else(|| ApplyError::Validation(format!("{field} is required")))
    }

    /// Scalar rendered as text; empty strings read as absent
    pub fn optional_text(&self, field: &str) -> Result<Option<String>, ApplyError> {
        let text = match self.value(field) {
            None => return Ok(None),
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::Bool(flag)) => flag.to_string(),
            Some(_) => return Err(invalid(field, "must be text")),
        };
        Ok(Some(text).filter(|text| !text.is_empty()))
    }

    pub fn required_integer(&self, field: &str) -> Result<i64, ApplyError> {
        self.optional_integer(field)?
            .ok_or_else(|| ApplyError::Validation(format!("{field} is required")))
    }

    pub fn optional_integer(&self, field: &str) -> Result<Option<i64>, ApplyError> {
        self.value(field)
            .map(|value| coerce_integer(value).ok_or_else(|| invalid(field, "must be an integer")))
            .transpose()
    }

    pub fn required_date(&self, field: &str) -> Result<NaiveDate, ApplyError> {
        self.optional_date(field)?
            .ok_or_else(|| ApplyError::Validation(format!("{field} is required")))
    }

    /// `YYYY-MM-DD` or an RFC 3339 timestamp
    pub fn optional_date(&self, field: &str) -> Result<Option<NaiveDate>, ApplyError> {
        let Some(value) = self.value(field) else {
            return Ok(None);
        };
        value
            .as_str()
            .and_then(parse_date)
            .map(Some)
            .ok_or_else(|| invalid(field, "is not a valid date"))
    }

    /// Unix milliseconds, or a date/timestamp string converted to them
    pub fn optional_timestamp(&self, field: &str) -> Result<Option<i64>, ApplyError> {
        let Some(value) = self.value(field) else {
            return Ok(None);
        };
        if let Some(millis) = coerce_integer(value) {
            return Ok(Some(millis));
        }
        value
            .as_str()
            .and_then(parse_timestamp)
            .map(Some)
            .ok_or_else(|| invalid(field, "is not a valid timestamp"))
    }

    /// Array of scalars collected as a set of strings
    pub fn string_set(&self, field: &str) -> Result<Option<BTreeSet<String>>, ApplyError> {
        let Some(value) = self.value(field) else {
            return Ok(None);
        };
        let Value::Array(items) = value else {
            return Err(invalid(field, "must be a list"));
        };

        let mut set = BTreeSet::new();
        for item in items {
            let text = match item {
                Value::String(text) => text.trim().to_string(),
                Value::Number(number) => number.to_string(),
                _ => return Err(invalid(field, "must contain only text entries")),
            };
            if !text.is_empty() {
                set.insert(text);
            }
        }
        Ok(Some(set))
    }
}

fn invalid(field: &str, problem: &str) -> ApplyError {
    ApplyError::Validation(format!("{field} {problem}"))
}

/// JSON integer, integral float, or numeric string
pub fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| integral(number.as_f64()?)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| integral(text.parse::<f64>().ok()?))
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(number: f64) -> Option<i64> {
    (number.is_finite() && number.fract() == 0.0 && number.abs() <= i64::MAX as f64)
        .then_some(number as i64)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
}

fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp_millis())
        .or_else(|| {
            let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
            Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reader_over(value: Value) -> Payload {
        let Value::Object(map) = value else {
            panic!("payload must be an object");
        };
        map
    }

    #[test]
    fn integers_accept_strings_and_integral_floats() {
        let payload = reader_over(json!({"a": 5, "b": "7", "c": 3.0, "d": 2.5, "e": true, "f": " 12 "}));
        let reader = PayloadReader::new(&payload);

        assert_eq!(reader.required_integer("a").unwrap(), 5);
        assert_eq!(reader.required_integer("b").unwrap(), 7);
        assert_eq!(reader.required_integer("c").unwrap(), 3);
        assert_eq!(reader.required_integer("f").unwrap(), 12);
        assert!(reader.required_integer("d").is_err());
        assert!(reader.required_integer("e").is_err());
        assert_eq!(reader.optional_integer("missing").unwrap(), None);
    }

    #[test]
    fn missing_field_error_names_the_field() {
        let payload = Payload::new();
        let err = PayloadReader::new(&payload).required_text("name").unwrap_err();
        assert_eq!(err.to_string(), "name is required");
    }

    #[test]
    fn blank_text_reads_as_absent() {
        let payload = reader_over(json!({"name": "   ", "ward": 4}));
        let reader = PayloadReader::new(&payload);
        assert!(reader.required_text("name").is_err());
        assert_eq!(reader.optional_text("ward").unwrap().as_deref(), Some("4"));
    }

    #[test]
    fn dates_accept_plain_and_rfc3339() {
        let payload = reader_over(json!({
            "plain": "2026-01-01",
            "full": "2026-01-01T10:30:00Z",
            "bad": "01/01/2026",
        }));
        let reader = PayloadReader::new(&payload);
        let expected = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();

        assert_eq!(reader.required_date("plain").unwrap(), expected);
        assert_eq!(reader.required_date("full").unwrap(), expected);
        let err = reader.required_date("bad").unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn timestamps_accept_millis_and_strings() {
        let payload = reader_over(json!({"ms": 1_700_000_000_000_i64, "iso": "1970-01-02"}));
        let reader = PayloadReader::new(&payload);
        assert_eq!(reader.optional_timestamp("ms").unwrap(), Some(1_700_000_000_000));
        assert_eq!(reader.optional_timestamp("iso").unwrap(), Some(86_400_000));
    }

    #[test]
    fn string_sets_deduplicate() {
        let payload = reader_over(json!({"v": ["BCG", "OPV", "BCG"], "bad": "BCG"}));
        let reader = PayloadReader::new(&payload);
        let set = reader.string_set("v").unwrap().unwrap();
        assert_eq!(set.len(), 2);
        assert!(reader.string_set("bad").is_err());
    }
}
