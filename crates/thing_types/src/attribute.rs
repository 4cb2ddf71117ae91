//! Attribute schemas
//!
//! An [`AttributeSchema`] describes one controllable or observable value on a
//! thing: its code, semantic purpose, the value types it accepts, optional
//! bounds, format, multiplicity, enumeration and read/write flags. Schemas
//! are immutable once built; the fields are private and only readable
//! through accessors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::semantic::SemanticId;
use crate::value::{Value, ValueType};

// ─────────────────────────────────────────────────────────────────────────────
// Format & Multiplicity
// ─────────────────────────────────────────────────────────────────────────────

/// String formats an attribute can require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// `#RRGGBB`
    Color,
    /// ISO-8601 date-time in UTC
    DateTime,
    /// `YYYY-MM-DD`
    Date,
    /// `HH:MM:SS`
    Time,
    Uri,
}

impl Format {
    /// Parse a format token, either bare (`color`) or semantic (`iot:format.color`)
    pub fn from_token(token: &str) -> Option<Self> {
        let bare = token
            .rsplit_once("format.")
            .map(|(_, rest)| rest)
            .unwrap_or(token);
        match bare.to_lowercase().as_str() {
            "color" | "colour" => Some(Self::Color),
            "datetime" | "date-time" => Some(Self::DateTime),
            "date" => Some(Self::Date),
            "time" => Some(Self::Time),
            "uri" | "url" => Some(Self::Uri),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Format::Color => "iot:format.color",
            Format::DateTime => "iot:format.datetime",
            Format::Date => "iot:format.date",
            Format::Time => "iot:format.time",
            Format::Uri => "iot:format.uri",
        }
    }
}

/// How many values an attribute holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Multiplicity {
    #[default]
    Scalar,
    List,
    /// A list deduplicated by value
    Set,
}

impl Multiplicity {
    pub fn from_token(token: &str) -> Option<Self> {
        let bare = token
            .rsplit_once("type.")
            .map(|(_, rest)| rest)
            .unwrap_or(token);
        match bare.to_lowercase().as_str() {
            "scalar" => Some(Self::Scalar),
            "list" | "array" => Some(Self::List),
            "set" => Some(Self::Set),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Attribute Schema
// ─────────────────────────────────────────────────────────────────────────────

/// Declarative description of one attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeSchema {
    code: String,
    purpose: SemanticId,
    types: Vec<ValueType>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    format: Option<Format>,
    multiplicity: Multiplicity,
    readable: bool,
    writable: bool,
    enumeration: Option<Vec<Value>>,
    unit: Option<SemanticId>,
    name: Option<String>,
    /// Declared semantic properties, used to match structured keys
    properties: BTreeMap<String, Value>,
}

impl AttributeSchema {
    /// Start building a schema for `code` with the given purpose
    pub fn builder(code: impl Into<String>, purpose: impl Into<String>) -> AttributeBuilder {
        AttributeBuilder::new(code, purpose)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn purpose(&self) -> &SemanticId {
        &self.purpose
    }

    pub fn types(&self) -> &[ValueType] {
        &self.types
    }

    pub fn has_type(&self, value_type: ValueType) -> bool {
        self.types.contains(&value_type)
    }

    pub fn minimum(&self) -> Option<f64> {
        self.minimum
    }

    pub fn maximum(&self) -> Option<f64> {
        self.maximum
    }

    pub fn format(&self) -> Option<Format> {
        self.format
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    /// Sensor side: the value can be observed
    pub fn readable(&self) -> bool {
        self.readable
    }

    /// Actuator side: the value can be commanded
    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn enumeration(&self) -> Option<&[Value]> {
        self.enumeration.as_deref()
    }

    pub fn unit(&self) -> Option<&SemanticId> {
        self.unit.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// Property keys this attribute declares
    pub fn vocabulary(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Whether the declared property `key` satisfies `expected`
    ///
    /// Array-valued properties (e.g. `iot:type`) match when any element does.
    pub fn property_matches(&self, key: &str, expected: &Value) -> bool {
        match self.properties.get(key) {
            None => false,
            Some(Value::Array(items)) => match expected {
                Value::Array(wanted) => wanted
                    .iter()
                    .all(|w| items.iter().any(|i| i.loosely_equals(w))),
                single => items.iter().any(|i| i.loosely_equals(single)),
            },
            Some(declared) => declared.loosely_equals(expected),
        }
    }

    /// Schema-aware change detection used before writing a band
    ///
    /// Null-typed attributes are momentary triggers; any value written to
    /// one always counts as a change.
    pub fn is_change(&self, current: Option<&Value>, next: &Value) -> bool {
        if self.has_type(ValueType::Null) {
            return true;
        }
        match current {
            None => true,
            Some(current) => !current.loosely_equals(next),
        }
    }
}

impl fmt::Display for AttributeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.purpose)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`AttributeSchema`]; validation happens in [`AttributeBuilder::build`]
#[derive(Debug, Clone)]
pub struct AttributeBuilder {
    code: String,
    purpose: String,
    types: Vec<ValueType>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    format: Option<Format>,
    multiplicity: Multiplicity,
    readable: bool,
    writable: bool,
    enumeration: Option<Vec<Value>>,
    unit: Option<String>,
    name: Option<String>,
    extra: BTreeMap<String, Value>,
}

impl AttributeBuilder {
    pub fn new(code: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            purpose: purpose.into(),
            types: Vec::new(),
            minimum: None,
            maximum: None,
            format: None,
            multiplicity: Multiplicity::Scalar,
            readable: true,
            writable: true,
            enumeration: None,
            unit: None,
            name: None,
            extra: BTreeMap::new(),
        }
    }

    /// Add a value type; declaration order is kept, duplicates ignored
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        if !self.types.contains(&value_type) {
            self.types.push(value_type);
        }
        self
    }

    pub fn boolean(self) -> Self {
        self.value_type(ValueType::Boolean)
    }

    pub fn integer(self) -> Self {
        self.value_type(ValueType::Integer)
    }

    pub fn number(self) -> Self {
        self.value_type(ValueType::Number)
    }

    pub fn string(self) -> Self {
        self.value_type(ValueType::String)
    }

    pub fn null(self) -> Self {
        self.value_type(ValueType::Null)
    }

    pub fn minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn multiplicity(mut self, multiplicity: Multiplicity) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    pub fn list(self) -> Self {
        self.multiplicity(Multiplicity::List)
    }

    pub fn set(self) -> Self {
        self.multiplicity(Multiplicity::Set)
    }

    pub fn readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Observe-only attribute
    pub fn sensor(self) -> Self {
        self.readable(true).writable(false)
    }

    /// Command-only attribute
    pub fn actuator(self) -> Self {
        self.readable(false).writable(true)
    }

    pub fn enumeration<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enumeration = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare an additional semantic property used for key matching
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Validate and freeze the schema
    pub fn build(self) -> SchemaResult<AttributeSchema> {
        let code = self.code.trim().to_string();
        if code.is_empty() {
            return Err(SchemaError::MissingCode);
        }
        let purpose = SemanticId::parse(&self.purpose)?;
        if self.types.is_empty() {
            return Err(SchemaError::NoTypes(code));
        }
        if let (Some(minimum), Some(maximum)) = (self.minimum, self.maximum) {
            if minimum > maximum {
                return Err(SchemaError::InvalidBounds {
                    code,
                    minimum,
                    maximum,
                });
            }
        }
        let unit = self.unit.as_deref().map(SemanticId::parse).transpose()?;

        let mut properties = BTreeMap::new();
        for (key, value) in self.extra {
            let key = SemanticId::parse(&key)?.as_str().to_string();
            properties.insert(key, value);
        }
        properties.insert("iot:purpose".to_string(), Value::from(purpose.as_str()));
        let type_tokens: BTreeSet<&str> = self.types.iter().map(ValueType::token).collect();
        properties.insert(
            "iot:type".to_string(),
            Value::from(type_tokens.into_iter().collect::<Vec<_>>()),
        );
        properties.insert("iot:read".to_string(), Value::Bool(self.readable));
        properties.insert("iot:write".to_string(), Value::Bool(self.writable));
        properties.insert("iot:sensor".to_string(), Value::Bool(self.readable));
        properties.insert("iot:actuator".to_string(), Value::Bool(self.writable));
        if let Some(format) = self.format {
            properties.insert("iot:format".to_string(), Value::from(format.token()));
        }
        if let Some(unit) = &unit {
            properties.insert("iot:unit".to_string(), Value::from(unit.as_str()));
        }
        if let Some(minimum) = self.minimum {
            properties.insert("iot:minimum".to_string(), Value::Float(minimum));
        }
        if let Some(maximum) = self.maximum {
            properties.insert("iot:maximum".to_string(), Value::Float(maximum));
        }
        if let Some(name) = &self.name {
            properties.insert("schema:name".to_string(), Value::from(name.as_str()));
        }

        Ok(AttributeSchema {
            code,
            purpose,
            types: self.types,
            minimum: self.minimum,
            maximum: self.maximum,
            format: self.format,
            multiplicity: self.multiplicity,
            readable: self.readable,
            writable: self.writable,
            enumeration: self.enumeration,
            unit,
            name: self.name,
            properties,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_declares_properties() {
        let attr = AttributeSchema::builder("on", "iot-purpose:on")
            .boolean()
            .actuator()
            .build()
            .unwrap();

        assert_eq!(attr.code(), "on");
        assert_eq!(attr.purpose().as_str(), "iot-purpose:on");
        assert!(attr.writable());
        assert!(!attr.readable());
        assert!(attr.property_matches("iot:purpose", &Value::from("iot-purpose:on")));
        assert!(attr.property_matches("iot:type", &Value::from("iot:type.boolean")));
        assert!(attr.property_matches("iot:actuator", &Value::Bool(true)));
        assert!(!attr.property_matches("iot:unit", &Value::from("iot-unit:percent")));
    }

    #[test]
    fn test_build_rejects_malformed() {
        assert_eq!(
            AttributeSchema::builder("", "iot-purpose:on").boolean().build(),
            Err(SchemaError::MissingCode)
        );
        assert!(matches!(
            AttributeSchema::builder("on", "on").boolean().build(),
            Err(SchemaError::NotAbsolute(_))
        ));
        assert!(matches!(
            AttributeSchema::builder("on", "iot-purpose:on").build(),
            Err(SchemaError::NoTypes(_))
        ));
        assert!(matches!(
            AttributeSchema::builder("level", "iot-purpose:brightness")
                .integer()
                .minimum(10.0)
                .maximum(0.0)
                .build(),
            Err(SchemaError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn test_is_change() {
        let level = AttributeSchema::builder("level", "iot-purpose:brightness")
            .integer()
            .build()
            .unwrap();
        assert!(level.is_change(None, &Value::Int(1)));
        assert!(!level.is_change(Some(&Value::Int(1)), &Value::Float(1.0)));
        assert!(level.is_change(Some(&Value::Int(1)), &Value::Int(2)));

        let trigger = AttributeSchema::builder("ring", "iot-purpose:ring")
            .null()
            .build()
            .unwrap();
        assert!(trigger.is_change(Some(&Value::Null), &Value::Null));

        let toggle = AttributeSchema::builder("toggle", "iot-purpose:on")
            .boolean()
            .null()
            .build()
            .unwrap();
        assert!(toggle.is_change(Some(&Value::Bool(true)), &Value::Bool(true)));
        assert!(toggle.is_change(None, &Value::Null));
    }

    #[test]
    fn test_format_and_multiplicity_tokens() {
        assert_eq!(Format::from_token("iot:format.datetime"), Some(Format::DateTime));
        assert_eq!(Format::from_token("color"), Some(Format::Color));
        assert_eq!(Format::from_token("bogus"), None);
        assert_eq!(Multiplicity::from_token("iot:type.set"), Some(Multiplicity::Set));
    }
}
