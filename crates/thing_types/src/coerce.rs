//! Validation and coercion of raw values against an attribute schema
//!
//! Coercion is total: it never fails, it only produces `None` ("absent")
//! when a value cannot be made to fit. Callers treat absent as "do not
//! update this field".

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};

use crate::attribute::{AttributeSchema, Format, Multiplicity};
use crate::value::{Value, ValueType};

/// Order in which target types are tried when the value's own type is not declared
const COERCION_ORDER: [ValueType; 4] = [
    ValueType::Boolean,
    ValueType::Integer,
    ValueType::Number,
    ValueType::String,
];

/// Order in which the zero value of an absent input is chosen
const ZERO_ORDER: [ValueType; 5] = [
    ValueType::Boolean,
    ValueType::Integer,
    ValueType::Number,
    ValueType::String,
    ValueType::Null,
];

impl AttributeSchema {
    /// Validate and coerce a raw value
    ///
    /// Returns `None` when the value cannot satisfy the schema.
    pub fn validate(&self, raw: Option<&Value>) -> Option<Value> {
        match self.multiplicity() {
            Multiplicity::Scalar => self.validate_scalar(raw),
            Multiplicity::List | Multiplicity::Set => {
                let items: Vec<&Value> = match raw {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items.iter().collect(),
                    Some(single) => vec![single],
                };
                let mut out: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    let Some(coerced) = self.validate_scalar(Some(item)) else {
                        continue;
                    };
                    if self.multiplicity() == Multiplicity::Set
                        && out.iter().any(|seen| seen.loosely_equals(&coerced))
                    {
                        continue;
                    }
                    out.push(coerced);
                }
                Some(Value::Array(out))
            }
        }
    }

    /// Zero value of the first declared type in preference order
    pub fn zero_value(&self) -> Value {
        let zero_type = ZERO_ORDER
            .into_iter()
            .find(|t| self.has_type(*t))
            .unwrap_or(ValueType::Null);
        match zero_type {
            ValueType::Boolean => Value::Bool(false),
            ValueType::Integer => Value::Int(0),
            ValueType::Number => Value::Float(0.0),
            ValueType::String => Value::String(String::new()),
            ValueType::Null => Value::Null,
        }
    }

    fn validate_scalar(&self, raw: Option<&Value>) -> Option<Value> {
        let value = match raw {
            Some(Value::Null) if self.has_type(ValueType::Null) => return Some(Value::Null),
            None | Some(Value::Null) => self.zero_value(),
            Some(Value::Array(_)) => return None,
            Some(value) => self.coerce_type(value)?,
        };
        let value = self.clamp(value);
        let value = match (value, self.format()) {
            (Value::String(s), Some(format)) => Value::String(coerce_format(&s, format)?),
            (value, _) => value,
        };
        match self.enumeration() {
            Some(allowed) if !allowed.iter().any(|a| a.loosely_equals(&value)) => None,
            _ => Some(value),
        }
    }

    fn coerce_type(&self, value: &Value) -> Option<Value> {
        let own = value.value_type()?;
        if self.has_type(own) {
            return Some(value.clone());
        }
        // Integer values are acceptable wherever numbers are
        if own == ValueType::Integer && self.has_type(ValueType::Number) {
            return value.as_f64().map(Value::Float);
        }
        COERCION_ORDER
            .into_iter()
            .filter(|target| self.has_type(*target))
            .find_map(|target| self.convert(value, target))
    }

    fn convert(&self, value: &Value, target: ValueType) -> Option<Value> {
        match (value, target) {
            (Value::Bool(b), ValueType::Integer) => {
                let bound = if *b { self.maximum().unwrap_or(1.0) } else { self.minimum().unwrap_or(0.0) };
                Some(Value::Int(bound.round() as i64))
            }
            (Value::Bool(b), ValueType::Number) => {
                let bound = if *b { self.maximum().unwrap_or(1.0) } else { self.minimum().unwrap_or(0.0) };
                Some(Value::Float(bound))
            }
            (Value::Bool(b), ValueType::String) => Some(Value::String(b.to_string())),

            (Value::Int(i), ValueType::Boolean) => Some(Value::Bool(*i != 0)),
            (Value::Int(i), ValueType::Number) => Some(Value::Float(*i as f64)),
            (Value::Int(i), ValueType::String) => Some(Value::String(i.to_string())),

            (Value::Float(f), ValueType::Boolean) => Some(Value::Bool(*f != 0.0)),
            (Value::Float(f), ValueType::Integer) if f.is_finite() => {
                Some(Value::Int(f.round() as i64))
            }
            (Value::Float(f), ValueType::String) => Some(Value::String(f.to_string())),

            (Value::String(s), ValueType::Boolean) => Some(Value::Bool(parse_bool(s))),
            (Value::String(s), ValueType::Integer) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| {
                        s.parse::<f64>()
                            .ok()
                            .filter(|f| f.is_finite())
                            .map(|f| f.round() as i64)
                    })
                    .map(Value::Int)
            }
            (Value::String(s), ValueType::Number) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float),

            _ => None,
        }
    }

    fn clamp(&self, value: Value) -> Value {
        match value {
            Value::Int(mut i) => {
                if let Some(minimum) = self.minimum() {
                    i = i.max(minimum.ceil() as i64);
                }
                if let Some(maximum) = self.maximum() {
                    i = i.min(maximum.floor() as i64);
                }
                Value::Int(i)
            }
            Value::Float(mut f) => {
                if let Some(minimum) = self.minimum() {
                    f = f.max(minimum);
                }
                if let Some(maximum) = self.maximum() {
                    f = f.min(maximum);
                }
                Value::Float(f)
            }
            other => other,
        }
    }
}

/// `""`, `"0"`, `"off"`, `"false"` and `"no"` are false, anything else true
fn parse_bool(s: &str) -> bool {
    !matches!(
        s.trim().to_lowercase().as_str(),
        "" | "0" | "off" | "false" | "no"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Format Coercion
// ─────────────────────────────────────────────────────────────────────────────

/// Normalise a string to `format`, `None` if it cannot satisfy it
pub fn coerce_format(s: &str, format: Format) -> Option<String> {
    let s = s.trim();
    match format {
        Format::Color => coerce_color(s),
        Format::DateTime => parse_datetime(s)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Format::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()))
            .map(|d| d.format("%Y-%m-%d").to_string()),
        Format::Time => ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
            .or_else(|| parse_datetime(s).map(|dt| dt.time()))
            .map(|t| t.format("%H:%M:%S").to_string()),
        Format::Uri => is_uri(s).then(|| s.to_string()),
    }
}

fn coerce_color(s: &str) -> Option<String> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let full = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => hex.to_string(),
        _ => return None,
    };
    Some(format!("#{}", full.to_uppercase()))
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Some(naive.and_utc())
}

fn is_uri(s: &str) -> bool {
    let Some((scheme, rest)) = s.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
        && !s.chars().any(char::is_whitespace)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn integer(min: Option<f64>, max: Option<f64>) -> AttributeSchema {
        let mut b = AttributeSchema::builder("level", "iot-purpose:brightness").integer();
        if let Some(min) = min {
            b = b.minimum(min);
        }
        if let Some(max) = max {
            b = b.maximum(max);
        }
        b.build().unwrap()
    }

    #[test]
    fn test_boolean_into_bounded_integer() {
        let attr = integer(Some(0.0), Some(10.0));
        assert_eq!(attr.validate(Some(&Value::Bool(true))), Some(Value::Int(10)));
        assert_eq!(attr.validate(Some(&Value::Bool(false))), Some(Value::Int(0)));
    }

    #[test]
    fn test_boolean_into_unbounded_integer() {
        let attr = integer(None, None);
        assert_eq!(attr.validate(Some(&Value::Bool(true))), Some(Value::Int(1)));
        assert_eq!(attr.validate(Some(&Value::Bool(false))), Some(Value::Int(0)));
    }

    #[test]
    fn test_integer_back_to_boolean() {
        let attr = AttributeSchema::builder("on", "iot-purpose:on").boolean().build().unwrap();
        assert_eq!(attr.validate(Some(&Value::Int(10))), Some(Value::Bool(true)));
        assert_eq!(attr.validate(Some(&Value::Int(0))), Some(Value::Bool(false)));
    }

    #[test]
    fn test_absent_yields_zero_value() {
        assert_eq!(integer(None, None).validate(None), Some(Value::Int(0)));
        assert_eq!(integer(Some(5.0), None).validate(None), Some(Value::Int(5)));

        let text = AttributeSchema::builder("label", "iot-purpose:label").string().build().unwrap();
        assert_eq!(text.validate(None), Some(Value::String(String::new())));

        let either = AttributeSchema::builder("x", "iot-purpose:x")
            .string()
            .boolean()
            .build()
            .unwrap();
        assert_eq!(either.validate(None), Some(Value::Bool(false)));
    }

    #[test]
    fn test_number_rounding_and_clamping() {
        let attr = integer(Some(0.0), Some(100.0));
        assert_eq!(attr.validate(Some(&Value::Float(41.6))), Some(Value::Int(42)));
        assert_eq!(attr.validate(Some(&Value::Int(250))), Some(Value::Int(100)));
        assert_eq!(attr.validate(Some(&Value::Int(-3))), Some(Value::Int(0)));
    }

    #[test]
    fn test_string_parsing() {
        let attr = integer(None, None);
        assert_eq!(attr.validate(Some(&Value::from(" 17 "))), Some(Value::Int(17)));
        assert_eq!(attr.validate(Some(&Value::from("2.5"))), Some(Value::Int(3)));
        assert_eq!(attr.validate(Some(&Value::from("seventeen"))), None);

        let flag = AttributeSchema::builder("on", "iot-purpose:on").boolean().build().unwrap();
        for falsy in ["", "0", "OFF", "False", "no"] {
            assert_eq!(flag.validate(Some(&Value::from(falsy))), Some(Value::Bool(false)));
        }
        assert_eq!(flag.validate(Some(&Value::from("yes"))), Some(Value::Bool(true)));
    }

    #[test]
    fn test_numbers_to_text() {
        let text = AttributeSchema::builder("label", "iot-purpose:label").string().build().unwrap();
        assert_eq!(text.validate(Some(&Value::Int(7))), Some(Value::from("7")));
        assert_eq!(text.validate(Some(&Value::Float(1.5))), Some(Value::from("1.5")));
        assert_eq!(text.validate(Some(&Value::Bool(true))), Some(Value::from("true")));
    }

    #[test]
    fn test_color_format() {
        let color = AttributeSchema::builder("color", "iot-purpose:color")
            .string()
            .format(Format::Color)
            .build()
            .unwrap();
        assert_eq!(color.validate(Some(&Value::from("#ff0000"))), Some(Value::from("#FF0000")));
        assert_eq!(color.validate(Some(&Value::from("0f0"))), Some(Value::from("#00FF00")));
        assert_eq!(color.validate(Some(&Value::from("red"))), None);
    }

    #[test]
    fn test_datetime_formats() {
        let when = AttributeSchema::builder("when", "iot-purpose:when")
            .string()
            .format(Format::DateTime)
            .build()
            .unwrap();
        assert_eq!(
            when.validate(Some(&Value::from("2024-03-01T10:00:00+01:00"))),
            Some(Value::from("2024-03-01T09:00:00.000Z"))
        );
        assert_eq!(
            when.validate(Some(&Value::from("2024-03-01"))),
            Some(Value::from("2024-03-01T00:00:00.000Z"))
        );
        assert_eq!(when.validate(Some(&Value::from("not-a-date"))), None);

        assert_eq!(
            coerce_format("2024-03-01T10:20:30Z", Format::Date),
            Some("2024-03-01".to_string())
        );
        assert_eq!(coerce_format("07:05", Format::Time), Some("07:05:00".to_string()));
        assert_eq!(coerce_format("https://example.com/x", Format::Uri), Some("https://example.com/x".to_string()));
        assert_eq!(coerce_format("no scheme", Format::Uri), None);
    }

    #[test]
    fn test_enumeration_is_closed() {
        let mode = AttributeSchema::builder("mode", "iot-purpose:mode")
            .string()
            .enumeration(["heat", "cool", "off"])
            .build()
            .unwrap();
        assert_eq!(mode.validate(Some(&Value::from("cool"))), Some(Value::from("cool")));
        assert_eq!(mode.validate(Some(&Value::from("fan"))), None);
    }

    #[test]
    fn test_list_and_set_multiplicity() {
        let list = AttributeSchema::builder("levels", "iot-purpose:levels")
            .integer()
            .list()
            .build()
            .unwrap();
        assert_eq!(
            list.validate(Some(&Value::from(vec![Value::from("1"), Value::from("x"), Value::Float(1.2)]))),
            Some(Value::from(vec![1, 1]))
        );
        assert_eq!(list.validate(Some(&Value::Int(4))), Some(Value::from(vec![4])));
        assert_eq!(list.validate(None), Some(Value::Array(vec![])));

        let set = AttributeSchema::builder("levels", "iot-purpose:levels")
            .integer()
            .set()
            .build()
            .unwrap();
        assert_eq!(
            set.validate(Some(&Value::from(vec![Value::from("1"), Value::Int(2), Value::Float(1.2)]))),
            Some(Value::from(vec![1, 2]))
        );
    }

    #[test]
    fn test_scalar_rejects_arrays() {
        assert_eq!(integer(None, None).validate(Some(&Value::from(vec![1]))), None);
    }
}
