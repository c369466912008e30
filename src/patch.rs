//! Typed patch plumbing.
//!
//! Every partially-updatable entity has a patch struct enumerating exactly
//! its mutable fields, deserialized with `deny_unknown_fields`. A payload
//! containing any other key is rejected wholesale before anything is
//! written; the allow-list lives in the type, not in runtime dictionary
//! inspection.
//!
//! Fields that can be set to NULL use `Option<Option<T>>` with
//! [`double_option`]: the outer `Option` is "key present", the inner one is
//! the value. A missing key leaves the column untouched; an explicit `null`
//! clears it.

use crate::error::WorkshopError;
use serde::{Deserialize, Deserializer};

/// Deserialize helper distinguishing a missing key from an explicit `null`.
///
/// Use together with `#[serde(default)]` on an `Option<Option<T>>` field.
pub fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// Deserialize a patch payload, mapping serde failures onto the error
/// taxonomy: unknown keys are `Forbidden` (the caller asked to mutate a field
/// outside the allow-list), anything else is `InvalidArgument`.
pub fn from_value<T: serde::de::DeserializeOwned>(
    payload: serde_json::Value,
) -> Result<T, WorkshopError> {
    serde_json::from_value(payload).map_err(|e| {
        let msg = e.to_string();
        if msg.starts_with("unknown field") {
            WorkshopError::Forbidden(format!("field not allowed: {msg}"))
        } else {
            WorkshopError::InvalidArgument(msg)
        }
    })
}

/// Trim a text field, mapping whitespace-only input to NULL; text columns
/// never store empty strings.
pub fn clean_text(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let t = s.trim().to_string();
        if t.is_empty() {
            None
        } else {
            Some(t)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct DemoPatch {
        #[serde(default)]
        name: Option<String>,
        #[serde(default, deserialize_with = "double_option")]
        notes: Option<Option<String>>,
    }

    #[test]
    fn test_missing_vs_null_vs_value() {
        let p: DemoPatch = from_value(json!({})).unwrap();
        assert!(p.name.is_none());
        assert!(p.notes.is_none());

        let p: DemoPatch = from_value(json!({"notes": null})).unwrap();
        assert_eq!(p.notes, Some(None));

        let p: DemoPatch = from_value(json!({"notes": "check brakes"})).unwrap();
        assert_eq!(p.notes, Some(Some("check brakes".to_string())));
    }

    #[test]
    fn test_unknown_field_is_forbidden() {
        let err = from_value::<DemoPatch>(json!({"name": "a", "evil": 1})).unwrap_err();
        match err {
            WorkshopError::Forbidden(m) => assert!(m.contains("evil")),
            other => panic!("expected Forbidden, got {other:?}"),
        }
    }

    #[test]
    fn test_type_mismatch_is_invalid_argument() {
        let err = from_value::<DemoPatch>(json!({"name": 42})).unwrap_err();
        assert!(matches!(err, WorkshopError::InvalidArgument(_)));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text(Some("  hi  ".into())), Some("hi".into()));
        assert_eq!(clean_text(Some("   ".into())), None);
        assert_eq!(clean_text(None), None);
    }
}
