//! Attribute values as they flow between bridges, bands and application code
//!
//! The value space is deliberately small: the scalar types an attribute can
//! declare plus arrays for list/set attributes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Flat mapping of attribute code (or semantic key) to value
pub type ValueMap = BTreeMap<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Value Type
// ─────────────────────────────────────────────────────────────────────────────

/// A single attribute or metadata value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// The null sentinel
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Elements of a list/set attribute
    Array(Vec<Value>),
}

/// The declared scalar kind of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Integer,
    Number,
    String,
    Null,
}

impl ValueType {
    /// Parse a type token, either bare (`integer`) or semantic (`iot:type.integer`)
    pub fn from_token(token: &str) -> Option<Self> {
        let bare = token
            .rsplit_once("type.")
            .map(|(_, rest)| rest)
            .unwrap_or(token);
        match bare.to_lowercase().as_str() {
            "boolean" | "bool" => Some(Self::Boolean),
            "integer" | "int" => Some(Self::Integer),
            "number" | "float" | "real" => Some(Self::Number),
            "string" | "str" => Some(Self::String),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    /// Semantic token used in attribute property maps
    pub fn token(&self) -> &'static str {
        match self {
            ValueType::Boolean => "iot:type.boolean",
            ValueType::Integer => "iot:type.integer",
            ValueType::Number => "iot:type.number",
            ValueType::String => "iot:type.string",
            ValueType::Null => "iot:type.null",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Integer => write!(f, "integer"),
            ValueType::Number => write!(f, "number"),
            ValueType::String => write!(f, "string"),
            ValueType::Null => write!(f, "null"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Accessors
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Scalar kind of this value, `None` for arrays
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => Some(ValueType::Null),
            Value::Bool(_) => Some(ValueType::Boolean),
            Value::Int(_) => Some(ValueType::Integer),
            Value::Float(_) => Some(ValueType::Number),
            Value::String(_) => Some(ValueType::String),
            Value::Array(_) => None,
        }
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 (also converts from float if lossless)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Get as f64 (also converts from int)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array reference
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Numeric-aware equality: `Int(1)` and `Float(1.0)` compare equal
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            _ => self == other,
        }
    }

    /// Text used as the lookup key in enumeration remap tables
    pub fn remap_key(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Convert into a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.clone())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    /// Objects have no attribute representation; a JSON-LD style reference
    /// (`{"@id": ...}`) collapses to its id and anything else becomes null.
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(mut obj) => match obj.remove("@id") {
                Some(serde_json::Value::String(id)) => Value::String(id),
                _ => Value::Null,
            },
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(serde_json::Value::from).collect())
            }
        }
    }
}

/// Convert a JSON object into a [`ValueMap`], `None` if `json` is not an object
pub fn value_map_from_json(json: &serde_json::Value) -> Option<ValueMap> {
    json.as_object().map(|obj| {
        obj.iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect()
    })
}

/// Convert a [`ValueMap`] into a JSON object
pub fn value_map_to_json(map: &ValueMap) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_interop() {
        let json = serde_json::json!({"on": true, "level": 42, "ratio": 0.5, "name": "lamp"});
        let map = value_map_from_json(&json).unwrap();
        assert_eq!(map.get("on"), Some(&Value::Bool(true)));
        assert_eq!(map.get("level"), Some(&Value::Int(42)));
        assert_eq!(map.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(value_map_to_json(&map), json);
    }

    #[test]
    fn test_reference_object_collapses_to_id() {
        let v = Value::from(serde_json::json!({"@id": "iot-purpose:on"}));
        assert_eq!(v, Value::String("iot-purpose:on".to_string()));
        assert!(Value::from(serde_json::json!({"x": 1})).is_null());
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Int(3).loosely_equals(&Value::Float(3.0)));
        assert!(!Value::Int(3).loosely_equals(&Value::String("3".into())));
        assert!(Value::from(vec![1, 2]).loosely_equals(&Value::from(vec![1.0, 2.0])));
    }

    #[test]
    fn test_type_tokens() {
        assert_eq!(ValueType::from_token("iot:type.integer"), Some(ValueType::Integer));
        assert_eq!(ValueType::from_token("Boolean"), Some(ValueType::Boolean));
        assert_eq!(ValueType::from_token("iot:type.list"), None);
        assert_eq!(ValueType::Number.token(), "iot:type.number");
    }

    #[test]
    fn test_untagged_serde() {
        let v: Value = serde_json::from_str("[1, \"a\", null, false]").unwrap();
        assert_eq!(
            v,
            Value::Array(vec![
                Value::Int(1),
                Value::String("a".into()),
                Value::Null,
                Value::Bool(false)
            ])
        );
    }
}
