//! Attribute Key Resolution
//!
//! Callers address attributes by code, by purpose or by a set of property
//! constraints. Resolution is mode-aware: when several attributes match,
//! writes prefer writable attributes and reads prefer readable ones.

use std::collections::BTreeMap;
use std::fmt;

use thing_types::{AttributeSchema, SemanticId, ThingModel, Value, compact};

use crate::error::KeyError;

/// Why an attribute is being looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Get,
    Set,
    On,
}

/// How an attribute is addressed
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// Exact attribute code; falls back to purpose when no code matches
    Code(String),
    /// Attribute purpose
    Purpose(SemanticId),
    /// Property constraints, all of which must hold
    Match(BTreeMap<String, Value>),
}

impl Key {
    pub fn code(code: impl Into<String>) -> Self {
        Key::Code(code.into())
    }

    pub fn purpose(purpose: &str) -> Result<Self, KeyError> {
        Ok(Key::Purpose(SemanticId::purpose(purpose)?))
    }

    /// Build a match key from `(property, value)` pairs
    pub fn matching<I, K, V>(constraints: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Key::Match(
            constraints
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Reject keys that could never resolve
    pub fn validate(&self) -> Result<(), KeyError> {
        match self {
            Key::Code(code) if code.trim().is_empty() => Err(KeyError::EmptyCode),
            Key::Match(constraints) if constraints.is_empty() => Err(KeyError::EmptyMatch),
            Key::Match(constraints) => {
                for key in constraints.keys() {
                    SemanticId::parse(key)
                        .map_err(|_| KeyError::InvalidConstraint(key.clone()))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Code(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Code(s)
    }
}

impl From<SemanticId> for Key {
    fn from(id: SemanticId) -> Self {
        Key::Purpose(id)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Code(code) => write!(f, "{}", code),
            Key::Purpose(purpose) => write!(f, "{}", purpose),
            Key::Match(constraints) => {
                write!(f, "{{")?;
                for (i, (k, v)) in constraints.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve `key` against `model`
///
/// Returns `Ok(None)` when nothing matches; callers treat that as a no-op.
pub fn find<'a>(
    model: &'a ThingModel,
    key: &Key,
    mode: Mode,
) -> Result<Option<&'a AttributeSchema>, KeyError> {
    key.validate()?;

    match key {
        Key::Code(code) => {
            if let Some(attribute) = model.attribute(code) {
                return Ok(Some(attribute));
            }
            match SemanticId::purpose(code.trim()) {
                Ok(purpose) => Ok(by_purpose(model, &purpose, mode)),
                Err(_) => Ok(None),
            }
        }
        Key::Purpose(purpose) => Ok(by_purpose(model, purpose, mode)),
        Key::Match(constraints) => {
            let vocabulary = model.vocabulary();
            let effective: Vec<(String, Value)> = constraints
                .iter()
                .map(|(k, v)| {
                    let key = compact(k);
                    let value = normalise_constraint(&key, v);
                    (key, value)
                })
                .filter(|(k, _)| k != "schema:name" && vocabulary.contains(k.as_str()))
                .collect();

            let candidates: Vec<&AttributeSchema> = model
                .attributes()
                .iter()
                .filter(|a| effective.iter().all(|(k, v)| a.property_matches(k, v)))
                .collect();
            Ok(choose(candidates, mode))
        }
    }
}

fn by_purpose<'a>(
    model: &'a ThingModel,
    purpose: &SemanticId,
    mode: Mode,
) -> Option<&'a AttributeSchema> {
    let candidates = model
        .attributes()
        .iter()
        .filter(|a| a.purpose() == purpose)
        .collect();
    choose(candidates, mode)
}

fn normalise_constraint(key: &str, value: &Value) -> Value {
    match (key, value) {
        ("iot:purpose", Value::String(s)) => SemanticId::purpose(s)
            .map(|id| Value::String(id.as_str().to_string()))
            .unwrap_or_else(|_| value.clone()),
        (_, Value::String(s)) if s.contains(':') => Value::String(compact(s)),
        _ => value.clone(),
    }
}

fn choose(candidates: Vec<&AttributeSchema>, mode: Mode) -> Option<&AttributeSchema> {
    if candidates.len() > 1 {
        let preferred = candidates.iter().copied().find(|a| match mode {
            Mode::Set => a.writable(),
            Mode::Get | Mode::On => a.readable(),
        });
        if let Some(attribute) = preferred {
            return Some(attribute);
        }
    }
    candidates.into_iter().next()
}
