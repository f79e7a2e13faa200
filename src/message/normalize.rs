use serde_json::Value;

use super::parser::Fields;
use super::Message;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("field {field:?} expected {expected}, found {found}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
        found: String,
    },
}

impl NormalizeError {
    fn invalid(field: &'static str, expected: &'static str, found: &Value) -> Self {
        Self::InvalidField {
            field,
            expected,
            found: found.to_string(),
        }
    }
}

/// Looks up a field, handling `null` the same way as a missing key.
fn lookup<'a>(fields: &'a Fields, name: &str) -> Option<&'a Value> {
    fields.get(name).filter(|value| !value.is_null())
}

fn text_field(fields: &Fields, name: &'static str) -> Result<String, NormalizeError> {
    match lookup(fields, name) {
        None => Ok(String::new()),
        Some(Value::String(inner)) => Ok(inner.clone()),
        Some(other) => Err(NormalizeError::invalid(name, "a string", other)),
    }
}

fn float_field(fields: &Fields, name: &'static str) -> Result<f64, NormalizeError> {
    let Some(value) = lookup(fields, name) else {
        return Ok(0.0);
    };
    let coerced = match value {
        Value::Number(inner) => inner.as_f64(),
        Value::String(inner) => inner.trim().parse::<f64>().ok(),
        _ => None,
    };
    coerced
        .filter(|inner| inner.is_finite())
        .ok_or_else(|| NormalizeError::invalid(name, "a number", value))
}

fn integer_field(fields: &Fields, name: &'static str) -> Result<i64, NormalizeError> {
    let Some(value) = lookup(fields, name) else {
        return Ok(0);
    };
    let coerced = match value {
        Value::Number(inner) => inner.as_i64().or_else(|| {
            inner
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(inner) => inner.trim().parse::<i64>().ok(),
        _ => None,
    };
    coerced.ok_or_else(|| NormalizeError::invalid(name, "an integer", value))
}

/// Maps parsed fields into a [`Message`].
///
/// Missing fields get their default. A field with the wrong shape rejects
/// the whole record rather than storing a partially coerced one.
pub fn normalize(fields: &Fields) -> Result<Message, NormalizeError> {
    Ok(Message {
        text: text_field(fields, "message")?,
        author: text_field(fields, "author")?,
        timestamp: text_field(fields, "timestamp")?,
        category: text_field(fields, "category")?,
        sentiment: float_field(fields, "sentiment")?,
        keyword: text_field(fields, "keyword_mentioned")?,
        length: integer_field(fields, "message_length")?,
    })
}

#[cfg(test)]
mod tests {
    use super::NormalizeError;
    use crate::message::parser::parse;

    fn normalize(input: &str) -> Result<crate::message::Message, NormalizeError> {
        let fields = parse(input.as_bytes()).unwrap().unwrap();
        super::normalize(&fields)
    }

    #[test]
    fn should_map_complete_record() {
        let message = normalize(
            r#"{"message":"hi","author":"A","timestamp":"2025-01-01T00:00:00","category":"News","sentiment":0.5,"keyword_mentioned":"x","message_length":2}"#,
        )
        .unwrap();
        assert_eq!(message.text, "hi");
        assert_eq!(message.author, "A");
        assert_eq!(message.timestamp, "2025-01-01T00:00:00");
        assert_eq!(message.category, "News");
        assert_eq!(message.sentiment, 0.5);
        assert_eq!(message.keyword, "x");
        assert_eq!(message.length, 2);
    }

    #[test]
    fn should_default_missing_fields() {
        let message = normalize(r#"{"author":"B","sentiment":null}"#).unwrap();
        assert_eq!(message.author, "B");
        assert_eq!(message.text, "");
        assert_eq!(message.category, "");
        assert_eq!(message.keyword, "");
        assert_eq!(message.sentiment, 0.0);
        assert_eq!(message.length, 0);
    }

    #[test]
    fn should_ignore_unknown_fields() {
        let message = normalize(r#"{"message":"hi","extra":[1,2,3]}"#).unwrap();
        assert_eq!(message.text, "hi");
    }

    #[test_case::test_case(r#"{"sentiment":"0.25"}"#, 0.25; "numeric string")]
    #[test_case::test_case(r#"{"sentiment":-1}"#, -1.0; "integer")]
    #[test_case::test_case(r#"{"sentiment":3.5}"#, 3.5; "out of range is kept")]
    fn should_coerce_sentiment(input: &str, expected: f64) {
        assert_eq!(normalize(input).unwrap().sentiment, expected);
    }

    #[test_case::test_case(r#"{"message_length":"12"}"#, 12; "numeric string")]
    #[test_case::test_case(r#"{"message_length":42.0}"#, 42; "integral float")]
    fn should_coerce_length(input: &str, expected: i64) {
        assert_eq!(normalize(input).unwrap().length, expected);
    }

    #[test_case::test_case(r#"{"sentiment":"very happy"}"#, "sentiment"; "non numeric sentiment")]
    #[test_case::test_case(r#"{"sentiment":true}"#, "sentiment"; "boolean sentiment")]
    #[test_case::test_case(r#"{"message_length":4.5}"#, "message_length"; "fractional length")]
    #[test_case::test_case(r#"{"message_length":"long"}"#, "message_length"; "non numeric length")]
    #[test_case::test_case(r#"{"author":42}"#, "author"; "numeric author")]
    #[test_case::test_case(r#"{"message":{"nested":true}}"#, "message"; "object message")]
    fn should_reject_wrong_shape(input: &str, expected: &str) {
        match normalize(input).unwrap_err() {
            NormalizeError::InvalidField { field, .. } => assert_eq!(field, expected),
        }
    }
}
