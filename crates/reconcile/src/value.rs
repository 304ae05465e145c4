//! Typed field values
//!
//! Remote payloads are validated into [`Value`] at the API boundary so the
//! differ only ever compares tagged scalars.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// Field name to value, ordered by name.
pub type Fields = BTreeMap<String, Value>;

/// Build a [`Fields`] map from `"name" => value` pairs.
///
/// ```
/// use reconcile::{fields, Value};
///
/// let f = fields! { "name" => "acme", "mfa_required" => true };
/// assert_eq!(f["name"], Value::from("acme"));
/// ```
#[macro_export]
macro_rules! fields {
    () => { $crate::Fields::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Fields::new();
        $( map.insert(::std::string::String::from($name), $crate::Value::from($value)); )+
        map
    }};
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render as an identifier string.
    ///
    /// Integral numbers lose their fractional part (`42.0` -> `"42"`), which
    /// is how numeric ids come back from JSON. Bools, nulls and non-integral
    /// numbers have no identifier form.
    pub fn as_id_string(&self) -> Option<String> {
        match self {
            Self::String(s) if !s.is_empty() => Some(s.clone()),
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 && *n >= 0.0 => {
                Some(format!("{n:.0}"))
            }
            _ => None,
        }
    }

    /// Validate a JSON scalar.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, ApiError> {
        match json {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Self::Number)
                .ok_or_else(|| ApiError::malformed(format!("number out of range: {n}"))),
            serde_json::Value::String(s) => Ok(Self::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(
                ApiError::malformed("expected a scalar value, got an array or object"),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{n:.0}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

/// Validate a JSON object into [`Fields`].
///
/// Nested objects are flattened into dotted keys (`credentials.type`).
/// Arrays are rejected.
pub fn fields_from_json(json: &serde_json::Value) -> Result<Fields, ApiError> {
    let serde_json::Value::Object(map) = json else {
        return Err(ApiError::malformed("expected a JSON object"));
    };
    let mut fields = Fields::new();
    flatten_into(&mut fields, "", map)?;
    Ok(fields)
}

fn flatten_into(
    out: &mut Fields,
    prefix: &str,
    map: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), ApiError> {
    for (key, value) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            serde_json::Value::Object(inner) => flatten_into(out, &name, inner)?,
            other => {
                let value = Value::from_json(other)
                    .map_err(|e| ApiError::malformed(format!("field '{name}': {}", e.message)))?;
                out.insert(name, value);
            }
        }
    }
    Ok(())
}

/// Inverse of [`fields_from_json`]: dotted keys become nested objects.
pub fn fields_to_json(fields: &Fields) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    for (name, value) in fields {
        let path: Vec<&str> = name.split('.').collect();
        insert_path(&mut root, &path, value.to_json());
    }
    serde_json::Value::Object(root)
}

fn insert_path(
    map: &mut serde_json::Map<String, serde_json::Value>,
    path: &[&str],
    value: serde_json::Value,
) {
    match path {
        [] => {}
        [leaf] => {
            map.insert((*leaf).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if !entry.is_object() {
                *entry = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_as_id_string() {
        assert_eq!(Value::Number(42.0).as_id_string(), Some("42".to_string()));
        assert_eq!(Value::from("7").as_id_string(), Some("7".to_string()));
        assert_eq!(Value::Number(4.5).as_id_string(), None);
        assert_eq!(Value::Number(-1.0).as_id_string(), None);
        assert_eq!(Value::Bool(true).as_id_string(), None);
        assert_eq!(Value::from("").as_id_string(), None);
        assert_eq!(Value::Null.as_id_string(), None);
    }

    #[test]
    fn test_number_and_string_differ() {
        assert_ne!(Value::Number(1.0), Value::from("1"));
    }

    #[test]
    fn test_fields_from_json_flattens() {
        let json = json!({
            "id": 12,
            "owner": "keboola",
            "credentials": { "type": "service_account", "project_id": "gcp-1" },
            "active": true,
            "region": null
        });
        let fields = fields_from_json(&json).unwrap();
        assert_eq!(fields["id"], Value::Number(12.0));
        assert_eq!(fields["credentials.type"], Value::from("service_account"));
        assert_eq!(fields["credentials.project_id"], Value::from("gcp-1"));
        assert_eq!(fields["active"], Value::Bool(true));
        assert!(fields["region"].is_null());
    }

    #[test]
    fn test_fields_from_json_rejects_arrays() {
        let err = fields_from_json(&json!({ "features": ["a", "b"] })).unwrap_err();
        assert!(err.message.contains("features"));

        assert!(fields_from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_fields_to_json_nests() {
        let f = fields! {
            "owner" => "keboola",
            "credentials.type" => "service_account",
            "credentials.private_key" => "-----BEGIN",
        };
        assert_eq!(
            fields_to_json(&f),
            json!({
                "owner": "keboola",
                "credentials": { "type": "service_account", "private_key": "-----BEGIN" }
            })
        );
    }

    #[test]
    fn test_serde_untagged() {
        let f: Fields = serde_json::from_str(r#"{"a":"x","b":true,"c":3,"d":null}"#).unwrap();
        assert_eq!(f["a"], Value::from("x"));
        assert_eq!(f["b"], Value::Bool(true));
        assert_eq!(f["c"], Value::Number(3.0));
        assert_eq!(f["d"], Value::Null);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Number(42.0).to_string(), "42");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
        assert_eq!(Value::from("acme").to_string(), "\"acme\"");
        assert_eq!(Value::Null.to_string(), "null");
    }
}
