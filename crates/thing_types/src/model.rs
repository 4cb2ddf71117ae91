//! Thing models
//!
//! A [`ThingModel`] is the immutable description shared by every thing of
//! one kind: its model code, ordered attribute schemas and initial metadata.
//! Models come either from a flattened semantic document handed over by the
//! graph loader, or from a TOML model file.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Deserialize;

use crate::attribute::{AttributeBuilder, AttributeSchema, Format, Multiplicity};
use crate::error::{SchemaError, SchemaResult};
use crate::semantic::{compact, meta_key};
use crate::value::{Value, ValueMap, ValueType};

/// Immutable model shared by all things of one kind
#[derive(Debug, Clone, PartialEq)]
pub struct ThingModel {
    model_code: String,
    attributes: Vec<AttributeSchema>,
    /// Initial metadata, keyed by semantic key
    meta: ValueMap,
}

impl ThingModel {
    /// Create a model, rejecting empty model codes and duplicate attribute codes
    pub fn new(model_code: impl Into<String>, attributes: Vec<AttributeSchema>) -> SchemaResult<Self> {
        let model_code = model_code.into();
        if model_code.trim().is_empty() {
            return Err(SchemaError::MissingModelCode);
        }
        let mut seen = HashSet::new();
        for attribute in &attributes {
            if !seen.insert(attribute.code()) {
                return Err(SchemaError::DuplicateCode(attribute.code().to_string()));
            }
        }
        let mut meta = ValueMap::new();
        meta.insert("iot:model-id".to_string(), Value::from(model_code.as_str()));
        Ok(Self {
            model_code,
            attributes,
            meta,
        })
    }

    /// Add an initial metadata entry; the key is normalised
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(meta_key(key), value.into());
        self
    }

    pub fn model_code(&self) -> &str {
        &self.model_code
    }

    pub fn attributes(&self) -> &[AttributeSchema] {
        &self.attributes
    }

    pub fn attribute(&self, code: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.code() == code)
    }

    pub fn meta(&self) -> &ValueMap {
        &self.meta
    }

    /// Human name, if the model declares one
    pub fn name(&self) -> Option<&str> {
        self.meta.get("schema:name").and_then(Value::as_str)
    }

    /// Every property key declared by at least one attribute
    pub fn vocabulary(&self) -> BTreeSet<&str> {
        self.attributes
            .iter()
            .flat_map(AttributeSchema::vocabulary)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Semantic Documents
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a model from a flattened semantic document
    ///
    /// The document is a JSON object whose predicates are either fully
    /// expanded IRIs or compact CURIEs. The model code comes from
    /// `iot:model-id`; attributes are the objects under `iot:attribute`.
    /// Every other top-level predicate becomes initial metadata.
    pub fn from_document(document: &serde_json::Value) -> SchemaResult<Self> {
        let object = document
            .as_object()
            .ok_or_else(|| SchemaError::MalformedDocument("document is not an object".into()))?;
        let object: HashMap<String, &serde_json::Value> =
            object.iter().map(|(k, v)| (compact(k), v)).collect();

        let model_code = match object.get("iot:model-id") {
            Some(serde_json::Value::String(code)) => code.clone(),
            Some(other) => return Err(SchemaError::MalformedDocument(format!("iot:model-id is {}", other))),
            None => return Err(SchemaError::MissingModelCode),
        };

        let attributes = match object.get("iot:attribute") {
            None => Vec::new(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(attribute_from_document)
                .collect::<SchemaResult<Vec<_>>>()?,
            Some(single) if single.is_object() => vec![attribute_from_document(single)?],
            Some(other) => {
                return Err(SchemaError::MalformedDocument(format!(
                    "iot:attribute is {}",
                    other
                )))
            }
        };

        let mut model = Self::new(model_code, attributes)?;
        for (key, value) in object {
            if key.starts_with('@') || key == "iot:attribute" || key == "iot:model-id" {
                continue;
            }
            model.meta.insert(meta_key(&key), Value::from((*value).clone()));
        }
        Ok(model)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // TOML Model Files
    // ─────────────────────────────────────────────────────────────────────────

    /// Parse a model from TOML content
    pub fn from_toml(content: &str) -> SchemaResult<Self> {
        // The TOML format is:
        // [model]
        // code = "hue-light"
        // name = "Hue Light"
        // facets = ["lighting"]
        //
        // [[attribute]]
        // code = "on"
        // purpose = "iot-purpose:on"
        // type = "boolean"

        #[derive(Deserialize)]
        struct TomlModel {
            model: TomlHeader,
            #[serde(default, rename = "attribute")]
            attributes: Vec<TomlAttribute>,
        }

        #[derive(Deserialize)]
        struct TomlHeader {
            code: String,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            description: Option<String>,
            #[serde(default)]
            facets: Vec<String>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        #[derive(Deserialize)]
        struct TomlAttribute {
            code: String,
            purpose: String,
            #[serde(rename = "type")]
            types: OneOrMany,
            #[serde(default)]
            multiplicity: Option<String>,
            #[serde(default)]
            minimum: Option<f64>,
            #[serde(default)]
            maximum: Option<f64>,
            #[serde(default)]
            format: Option<String>,
            #[serde(default)]
            unit: Option<String>,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            read: Option<bool>,
            #[serde(default)]
            write: Option<bool>,
            #[serde(default)]
            enumeration: Option<Vec<toml::Value>>,
        }

        let parsed: TomlModel =
            toml::from_str(content).map_err(|e| SchemaError::ParseError(e.to_string()))?;

        let attributes = parsed
            .attributes
            .into_iter()
            .map(|attr| {
                let mut builder = AttributeSchema::builder(attr.code, attr.purpose);
                let tokens = match attr.types {
                    OneOrMany::One(t) => vec![t],
                    OneOrMany::Many(ts) => ts,
                };
                builder = apply_type_tokens(builder, tokens.iter().map(String::as_str))?;
                if let Some(token) = attr.multiplicity {
                    let multiplicity = Multiplicity::from_token(&token)
                        .ok_or(SchemaError::UnknownType(token))?;
                    builder = builder.multiplicity(multiplicity);
                }
                if let Some(minimum) = attr.minimum {
                    builder = builder.minimum(minimum);
                }
                if let Some(maximum) = attr.maximum {
                    builder = builder.maximum(maximum);
                }
                if let Some(token) = attr.format {
                    let format =
                        Format::from_token(&token).ok_or(SchemaError::UnknownFormat(token))?;
                    builder = builder.format(format);
                }
                if let Some(unit) = attr.unit {
                    builder = builder.unit(unit);
                }
                if let Some(name) = attr.name {
                    builder = builder.name(name);
                }
                if let Some(read) = attr.read {
                    builder = builder.readable(read);
                }
                if let Some(write) = attr.write {
                    builder = builder.writable(write);
                }
                if let Some(values) = attr.enumeration {
                    builder = builder.enumeration(values.into_iter().map(toml_to_value));
                }
                builder.build()
            })
            .collect::<SchemaResult<Vec<_>>>()?;

        let mut model = Self::new(parsed.model.code, attributes)?;
        if let Some(name) = parsed.model.name {
            model = model.with_meta("name", name);
        }
        if let Some(description) = parsed.model.description {
            model = model.with_meta("description", description);
        }
        if !parsed.model.facets.is_empty() {
            let facets: Vec<Value> = parsed
                .model
                .facets
                .iter()
                .map(|f| {
                    if f.contains(':') {
                        Value::from(f.as_str())
                    } else {
                        Value::from(format!("iot-facet:{}", f))
                    }
                })
                .collect();
            model = model.with_meta("facet", facets);
        }
        Ok(model)
    }
}

fn toml_to_value(value: toml::Value) -> Value {
    match value {
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::String(s) => Value::String(s),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_value).collect()),
        other => Value::String(other.to_string()),
    }
}

/// Apply `iot:type.*` tokens: scalar kinds and the list/set multiplicities
fn apply_type_tokens<'a>(
    mut builder: AttributeBuilder,
    tokens: impl Iterator<Item = &'a str>,
) -> SchemaResult<AttributeBuilder> {
    for token in tokens {
        if let Some(value_type) = ValueType::from_token(token) {
            builder = builder.value_type(value_type);
        } else if let Some(multiplicity) = Multiplicity::from_token(token) {
            builder = builder.multiplicity(multiplicity);
        } else {
            return Err(SchemaError::UnknownType(token.to_string()));
        }
    }
    Ok(builder)
}

/// Single string from a value or a `{"@id": ...}` reference
fn as_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => obj.get("@id").and_then(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

fn as_ids(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items.iter().filter_map(as_id).collect(),
        other => as_id(other).into_iter().collect(),
    }
}

fn attribute_from_document(node: &serde_json::Value) -> SchemaResult<AttributeSchema> {
    let object = node
        .as_object()
        .ok_or_else(|| SchemaError::MalformedDocument("attribute is not an object".into()))?;
    let props: HashMap<String, &serde_json::Value> =
        object.iter().map(|(k, v)| (compact(k), v)).collect();

    // The code is the fragment of the attribute's @id, or an explicit iot:code
    let code = match props.get("iot:code").or_else(|| props.get("@id")) {
        Some(serde_json::Value::String(id)) => id
            .rsplit_once('#')
            .map(|(_, fragment)| fragment.to_string())
            .unwrap_or_else(|| id.clone()),
        Some(other) => return Err(SchemaError::InvalidCode(other.to_string())),
        None => return Err(SchemaError::MissingCode),
    };

    let purpose = props
        .get("iot:purpose")
        .and_then(|v| as_id(v))
        .map(|p| compact(&p))
        .unwrap_or_default();

    let mut builder = AttributeSchema::builder(code, purpose);
    let type_tokens: Vec<String> = props
        .get("iot:type")
        .map(|v| as_ids(v).iter().map(|t| compact(t)).collect())
        .unwrap_or_default();
    builder = apply_type_tokens(builder, type_tokens.iter().map(String::as_str))?;

    for (key, value) in &props {
        match key.as_str() {
            "@id" | "@type" | "iot:code" | "iot:purpose" | "iot:type" => {}
            "iot:minimum" => {
                if let Some(minimum) = value.as_f64() {
                    builder = builder.minimum(minimum);
                }
            }
            "iot:maximum" => {
                if let Some(maximum) = value.as_f64() {
                    builder = builder.maximum(maximum);
                }
            }
            "iot:format" => {
                let token = as_id(value).map(|t| compact(&t)).unwrap_or_default();
                let format = Format::from_token(&token).ok_or(SchemaError::UnknownFormat(token))?;
                builder = builder.format(format);
            }
            "iot:unit" => {
                if let Some(unit) = as_id(value) {
                    builder = builder.unit(unit);
                }
            }
            "iot:read" | "iot:sensor" => {
                if let Some(read) = value.as_bool() {
                    builder = builder.readable(read);
                }
            }
            "iot:write" | "iot:actuator" => {
                if let Some(write) = value.as_bool() {
                    builder = builder.writable(write);
                }
            }
            "iot:enumeration" => {
                let values = match value {
                    serde_json::Value::Array(items) => items.clone(),
                    single => vec![(*single).clone()],
                };
                builder = builder.enumeration(values.into_iter().map(Value::from));
            }
            "schema:name" => {
                if let Some(name) = value.as_str() {
                    builder = builder.name(name);
                }
            }
            other if !other.starts_with('@') => {
                builder = builder.property(other, Value::from((*value).clone()));
            }
            _ => {}
        }
    }
    builder.build()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
