use serde_json::{Map, Value};

pub type Fields = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unit is not valid utf-8")]
    Encoding(#[source] std::str::Utf8Error),
    #[error("unit is not valid json")]
    Syntax(#[source] serde_json::Error),
    #[error("expected a json object, found {0}")]
    NotAnObject(&'static str),
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Turns one raw unit into its key/value fields.
///
/// Blank units are not an error, they just don't carry anything.
pub fn parse(unit: &[u8]) -> Result<Option<Fields>, ParseError> {
    let text = std::str::from_utf8(unit).map_err(ParseError::Encoding)?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(text).map_err(ParseError::Syntax)? {
        Value::Object(fields) => Ok(Some(fields)),
        other => Err(ParseError::NotAnObject(kind_of(&other))),
    }
}
