//! Thing filters for derived collection views

use thing_types::{Value, meta_key};
use wildmatch::WildMatch;

use crate::thing::Thing;

/// Conjunction of conditions over a thing's identity, metadata and tags
#[derive(Debug, Clone, Default)]
pub struct ThingFilter {
    thing_id: Option<String>,
    model_code: Option<String>,
    name: Option<String>,
    zone: Option<String>,
    facet: Option<String>,
    tag: Option<String>,
    meta: Vec<(String, Value)>,
}

impl ThingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, thing_id: impl Into<String>) -> Self {
        self.thing_id = Some(thing_id.into());
        self
    }

    pub fn with_model_code(mut self, model_code: impl Into<String>) -> Self {
        self.model_code = Some(model_code.into());
        self
    }

    /// Name glob (`*` and `?`), case-insensitive
    pub fn with_name(mut self, pattern: impl Into<String>) -> Self {
        self.name = Some(pattern.into());
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Facet or any of its sub-facets (`lighting` matches `lighting.ceiling`)
    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        let facet = facet.into();
        let facet = if facet.contains(':') {
            facet
        } else {
            format!("iot-facet:{}", facet)
        };
        self.facet = Some(facet);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Metadata key (normalised) must equal `value`, or contain it when the
    /// stored value is a list
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.push((meta_key(key), value.into()));
        self
    }

    pub fn matches(&self, thing: &Thing) -> bool {
        if let Some(id) = &self.thing_id {
            if thing.thing_id() != *id {
                return false;
            }
        }
        if let Some(code) = &self.model_code {
            if thing.model_code() != code.as_str() {
                return false;
            }
        }
        if let Some(pattern) = &self.name {
            let name = thing.name().to_lowercase();
            if !WildMatch::new(&pattern.to_lowercase()).matches(&name) {
                return false;
            }
        }
        if let Some(zone) = &self.zone {
            if !thing.zones().iter().any(|z| z.eq_ignore_ascii_case(zone)) {
                return false;
            }
        }
        if let Some(facet) = &self.facet {
            let prefix = format!("{}.", facet);
            if !thing
                .facets()
                .iter()
                .any(|f| f == facet || f.starts_with(&prefix))
            {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !thing.has_tag(tag) {
                return false;
            }
        }
        self.meta.iter().all(|(key, expected)| match thing.meta(key) {
            Some(Value::Array(items)) => items.iter().any(|i| i.loosely_equals(expected)),
            Some(value) => value.loosely_equals(expected),
            None => false,
        })
    }
}
