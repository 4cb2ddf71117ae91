//! Namespaced semantic identifiers
//!
//! Identifiers are kept in compact CURIE form (`iot-purpose:on`) whenever the
//! namespace is one of the well-known vocabularies below, and as full IRIs
//! otherwise. Expanded input (`https://iotdb.org/pub/iot-purpose#on`) is
//! compacted on parse so both spellings compare equal.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Well-known vocabularies: (prefix, namespace IRI)
pub const NAMESPACES: &[(&str, &str)] = &[
    ("iot", "https://iotdb.org/pub/iot#"),
    ("iot-purpose", "https://iotdb.org/pub/iot-purpose#"),
    ("iot-unit", "https://iotdb.org/pub/iot-unit#"),
    ("iot-facet", "https://iotdb.org/pub/iot-facet#"),
    ("schema", "http://schema.org/"),
];

/// Short metadata keys accepted in place of their semantic form
const META_ALIASES: &[(&str, &str)] = &[
    ("name", "schema:name"),
    ("description", "schema:description"),
    ("manufacturer", "schema:manufacturer"),
    ("model", "schema:model"),
    ("zone", "iot:zone"),
    ("zones", "iot:zone"),
    ("facet", "iot:facet"),
    ("facets", "iot:facet"),
    ("thing-id", "iot:thing-id"),
    ("model-id", "iot:model-id"),
    ("reachable", "iot:reachable"),
];

/// Compact an IRI against the well-known namespaces
pub fn compact(iri: &str) -> String {
    for (prefix, namespace) in NAMESPACES {
        if let Some(rest) = iri.strip_prefix(namespace) {
            if !rest.is_empty() {
                return format!("{}:{}", prefix, rest);
            }
        }
    }
    iri.to_string()
}

/// Expand a CURIE with a well-known prefix into its full IRI
pub fn expand(curie: &str) -> String {
    if let Some((prefix, rest)) = curie.split_once(':') {
        if let Some((_, namespace)) = NAMESPACES.iter().find(|(p, _)| *p == prefix) {
            return format!("{}{}", namespace, rest);
        }
    }
    curie.to_string()
}

/// `scheme ":" rest` with an RFC 3986 scheme and a non-empty rest
fn is_absolute(s: &str) -> bool {
    let Some((scheme, rest)) = s.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    starts_alpha
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
        && !s.chars().any(char::is_whitespace)
}

/// Normalise a metadata key to its semantic form
///
/// Aliases (`name`, `zone`, ...) map to their vocabulary term, absolute keys
/// are compacted and any other bare word lands in the `iot:` vocabulary.
pub fn meta_key(key: &str) -> String {
    if let Some((_, semantic)) = META_ALIASES.iter().find(|(alias, _)| *alias == key) {
        return semantic.to_string();
    }
    if is_absolute(key) {
        compact(key)
    } else {
        format!("iot:{}", key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Semantic Identifier
// ─────────────────────────────────────────────────────────────────────────────

/// An absolute semantic identifier, compacted where possible
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SemanticId(String);

impl SemanticId {
    /// Parse an identifier, rejecting anything that is not absolute
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let trimmed = s.trim();
        if !is_absolute(trimmed) {
            return Err(SchemaError::NotAbsolute(s.to_string()));
        }
        Ok(Self(compact(trimmed)))
    }

    /// A purpose in the `iot-purpose:` vocabulary; bare words are namespaced
    pub fn purpose(s: &str) -> Result<Self, SchemaError> {
        if s.contains(':') {
            Self::parse(s)
        } else {
            Self::parse(&format!("iot-purpose:{}", s))
        }
    }

    /// Compact form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fully expanded IRI
    pub fn expanded(&self) -> String {
        expand(&self.0)
    }

    /// Last path segment of the identifier (`on` for `iot-purpose:on`)
    pub fn local_name(&self) -> &str {
        self.0
            .rsplit(|c: char| c == ':' || c == '#' || c == '/')
            .next()
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for SemanticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SemanticId {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<SemanticId> for String {
    fn from(id: SemanticId) -> Self {
        id.0
    }
}

impl AsRef<str> for SemanticId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_and_expand() {
        assert_eq!(compact("https://iotdb.org/pub/iot-purpose#on"), "iot-purpose:on");
        assert_eq!(expand("schema:name"), "http://schema.org/name");
        assert_eq!(compact("urn:x:y"), "urn:x:y");
    }

    #[test]
    fn test_parse_rejects_relative() {
        assert!(SemanticId::parse("on").is_err());
        assert!(SemanticId::parse(":on").is_err());
        assert!(SemanticId::parse("bad id:x").is_err());
        assert!(SemanticId::parse("").is_err());

        let id = SemanticId::parse("https://iotdb.org/pub/iot-purpose#brightness").unwrap();
        assert_eq!(id.as_str(), "iot-purpose:brightness");
        assert_eq!(id.local_name(), "brightness");
    }

    #[test]
    fn test_purpose_namespacing() {
        assert_eq!(SemanticId::purpose("on").unwrap().as_str(), "iot-purpose:on");
        assert_eq!(
            SemanticId::purpose("iot-purpose:color").unwrap().as_str(),
            "iot-purpose:color"
        );
    }

    #[test]
    fn test_meta_key() {
        assert_eq!(meta_key("name"), "schema:name");
        assert_eq!(meta_key("zones"), "iot:zone");
        assert_eq!(meta_key("http://schema.org/description"), "schema:description");
        assert_eq!(meta_key("room"), "iot:room");
    }
}
