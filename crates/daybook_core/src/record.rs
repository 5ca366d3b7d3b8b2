//! Helpers for evolving stored records without losing unknown fields.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Overlays the top-level keys of `patch` onto `base`.
///
/// Keys absent from `patch` survive untouched. When either side is not a
/// JSON object, `patch` replaces `base` wholesale.
pub fn shallow_merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_fields), Value::Object(patch_fields)) => {
            let mut merged = base_fields.clone();
            for (key, value) in patch_fields {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// Applies [`shallow_merge`] to a typed record.
///
/// Records should carry a `#[serde(flatten)]` map so fields this build
/// does not know about are kept.
pub fn merge_record<T>(base: &T, patch: &Value) -> Result<T, serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let base_value = serde_json::to_value(base)?;
    serde_json::from_value(shallow_merge(&base_value, patch))
}

#[cfg(test)]
mod tests {
    use super::{merge_record, shallow_merge};
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Map, Value};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Prefs {
        theme: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    }

    #[test]
    fn patch_keys_overwrite_and_others_survive() {
        let base = json!({"name": "Ada", "streak": 4, "nested": {"a": 1}});
        let patch = json!({"streak": 5, "nested": {"b": 2}});
        assert_eq!(
            shallow_merge(&base, &patch),
            json!({"name": "Ada", "streak": 5, "nested": {"b": 2}})
        );
    }

    #[test]
    fn non_object_patch_replaces_base() {
        assert_eq!(shallow_merge(&json!({"a": 1}), &json!([1])), json!([1]));
    }

    #[test]
    fn typed_merge_keeps_unknown_fields() {
        let stored: Prefs =
            serde_json::from_value(json!({"theme": "dark", "fontScale": 1.2})).unwrap();
        let merged = merge_record(&stored, &json!({"theme": "light"})).unwrap();
        assert_eq!(merged.theme, "light");
        assert_eq!(merged.extra.get("fontScale"), Some(&json!(1.2)));
    }
}
