//! Error payloads reported by the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message used when a JSON-decoded result fails to parse.
pub const RESPONSE_PARSE_ERROR: &str = "Error parsing API response";

/// An error reported for an action.
///
/// The server usually sends errors as JSON-encoded strings, but not always,
/// so callers get either the decoded structure or the raw text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    /// Decoded JSON error (e.g. `{"name": ["This field is required."]}`).
    Structured(Value),
    /// Text that was not valid JSON.
    Opaque(String),
}

impl ErrorPayload {
    /// Decode a raw error string, falling back to the text itself.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Opaque(raw.to_owned()),
        }
    }

    /// Interpret the `error` field of a response frame.
    ///
    /// Strings go through [`ErrorPayload::parse`]; any other JSON value is
    /// already structured.
    pub fn from_wire(value: &Value) -> Self {
        match value {
            Value::String(raw) => Self::parse(raw),
            other => Self::Structured(other.clone()),
        }
    }

    /// The payload as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Structured(value) => value.clone(),
            Self::Opaque(text) => Value::String(text.clone()),
        }
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured(value) => write!(f, "{value}"),
            Self::Opaque(text) => f.write_str(text),
        }
    }
}

impl From<String> for ErrorPayload {
    fn from(text: String) -> Self {
        Self::Opaque(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_json_error() {
        let err = ErrorPayload::parse(r#"{"Message": "catastrophic failure"}"#);
        assert_eq!(
            err,
            ErrorPayload::Structured(json!({"Message": "catastrophic failure"}))
        );
    }

    #[test]
    fn falls_back_to_raw_text() {
        let err = ErrorPayload::parse("not json");
        assert_eq!(err, ErrorPayload::Opaque("not json".into()));
        assert_eq!(err.to_string(), "not json");
    }

    #[test]
    fn from_wire_keeps_objects() {
        let err = ErrorPayload::from_wire(&json!({"code": 1}));
        assert_eq!(err.to_value(), json!({"code": 1}));
    }

    #[test]
    fn from_wire_decodes_strings() {
        let err = ErrorPayload::from_wire(&json!("[\"a\"]"));
        assert_eq!(err, ErrorPayload::Structured(json!(["a"])));
    }

    #[test]
    fn serializes_untagged() {
        let opaque = serde_json::to_value(ErrorPayload::Opaque("x".into())).unwrap();
        assert_eq!(opaque, json!("x"));
    }
}
