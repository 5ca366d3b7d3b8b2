//! Syntactic and structural guards for stored payloads.
//!
//! # Responsibility
//! - Decide whether raw storage text is usable JSON.
//! - Convert parsed JSON into typed records, filtering bad collection
//!   elements instead of rejecting the whole collection.
//!
//! # Invariants
//! - Nothing in this module panics or propagates parse failures; callers
//!   receive a fallback or a [`ShapeError`].
//! - Diagnostics never log more than a bounded payload preview.

use log::warn;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::logging::payload_preview;

/// Parsed JSON had the wrong top-level structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeError {
    pub expected: &'static str,
    pub message: String,
}

impl ShapeError {
    pub fn new(expected: &'static str, message: impl Into<String>) -> Self {
        Self {
            expected,
            message: message.into(),
        }
    }
}

impl Display for ShapeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected {}: {}", self.expected, self.message)
    }
}

impl Error for ShapeError {}

/// Converts parsed JSON into a typed record.
pub type Shape<T> = Arc<dyn Fn(Value) -> Result<T, ShapeError> + Send + Sync>;

/// Returns whether `raw` is one of the tokens that mean "nothing stored".
///
/// Empty text and the literal strings `undefined` / `null` are written by
/// buggy callers that stringify a missing value.
pub fn is_absent_token(raw: &str) -> bool {
    matches!(raw.trim(), "" | "undefined" | "null")
}

/// Returns whether `raw` is non-empty, not an absent token, and parses as JSON.
pub fn is_well_formed(raw: &str) -> bool {
    !is_absent_token(raw) && serde_json::from_str::<Value>(raw).is_ok()
}

/// Parses `raw` into `T`, returning `fallback` on any failure.
pub fn parse_or_default<T: DeserializeOwned>(raw: &str, fallback: T) -> T {
    if is_absent_token(raw) {
        return fallback;
    }
    match serde_json::from_str::<T>(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                "event=parse_payload module=validator status=fallback error={} payload={}",
                err,
                payload_preview(raw)
            );
            fallback
        }
    }
}

/// Whole-value shape: the JSON must deserialize into `T` as-is.
pub fn strict_shape<T: DeserializeOwned + 'static>() -> Shape<T> {
    Arc::new(|value: Value| {
        serde_json::from_value::<T>(value)
            .map_err(|err| ShapeError::new(std::any::type_name::<T>(), err.to_string()))
    })
}

/// Collection shape: the top level must be an array; elements that do not
/// deserialize into `E` are dropped and logged.
pub fn collection_shape<E: DeserializeOwned + 'static>() -> Shape<Vec<E>> {
    Arc::new(|value: Value| filter_collection::<E>(value))
}

/// Applies [`collection_shape`] semantics directly.
///
/// # Errors
/// - [`ShapeError`] when `value` is not a JSON array.
pub fn filter_collection<E: DeserializeOwned>(value: Value) -> Result<Vec<E>, ShapeError> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(ShapeError::new(
                "array",
                format!("found {}", json_kind(&other)),
            ));
        }
    };

    let total = items.len();
    let kept = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<E>(item) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(
                    "event=filter_element module=validator status=dropped index={} error={}",
                    index, err
                );
                None
            }
        })
        .collect::<Vec<_>>();

    if kept.len() != total {
        warn!(
            "event=filter_collection module=validator status=partial kept={} dropped={}",
            kept.len(),
            total - kept.len()
        );
    }
    Ok(kept)
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::{
        collection_shape, filter_collection, is_absent_token, is_well_formed, parse_or_default,
        strict_shape,
    };
    use serde::Deserialize;
    use serde_json::{json, Value};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: String,
        title: String,
    }

    #[test]
    fn absent_tokens_are_not_well_formed() {
        for raw in ["", "  ", "undefined", "null"] {
            assert!(is_absent_token(raw));
            assert!(!is_well_formed(raw));
        }
        assert!(is_well_formed(r#"{"a":1}"#));
        assert!(!is_well_formed("{broken"));
    }

    #[test]
    fn parse_or_default_returns_fallback_on_bad_input() {
        let fallback = json!({"fallback": true});
        assert_eq!(parse_or_default("", fallback.clone()), fallback);
        assert_eq!(parse_or_default("undefined", fallback.clone()), fallback);
        assert_eq!(parse_or_default("{not json", fallback.clone()), fallback);
        assert_eq!(
            parse_or_default::<Value>(r#"{"a":1}"#, fallback),
            json!({"a": 1})
        );
    }

    #[test]
    fn collection_drops_elements_missing_required_fields() {
        let stored = json!([
            {"id": "1", "title": "water plants"},
            {"title": "no id here"},
            {"id": "3", "title": "call mum"}
        ]);
        let items = filter_collection::<Item>(stored).unwrap();
        assert_eq!(
            items.iter().map(|item| item.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "3"]
        );
    }

    #[test]
    fn collection_rejects_non_array_top_level() {
        let shape = collection_shape::<Item>();
        let err = shape(json!({"id": "1", "title": "x"})).unwrap_err();
        assert_eq!(err.expected, "array");
        assert!(err.message.contains("object"));
    }

    #[test]
    fn strict_shape_reports_type_mismatch() {
        let shape = strict_shape::<Item>();
        assert!(shape(json!({"id": "1"})).is_err());
        assert_eq!(
            shape(json!({"id": "1", "title": "t"})).unwrap(),
            Item {
                id: "1".to_string(),
                title: "t".to_string()
            }
        );
    }
}
