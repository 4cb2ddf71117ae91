//! Construction errors for schemas and models
//!
//! Data never produces these: coercion failures yield an absent value.

use thiserror::Error;

/// Errors raised while building an attribute schema or a thing model
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("Semantic identifier is not absolute: {0:?}")]
    NotAbsolute(String),

    #[error("Attribute code is missing or empty")]
    MissingCode,

    #[error("Attribute code is not a string: {0}")]
    InvalidCode(String),

    #[error("Attribute {0} declares no value types")]
    NoTypes(String),

    #[error("Unknown type token: {0}")]
    UnknownType(String),

    #[error("Unknown format token: {0}")]
    UnknownFormat(String),

    #[error("Attribute {code} has minimum {minimum} above maximum {maximum}")]
    InvalidBounds {
        code: String,
        minimum: f64,
        maximum: f64,
    },

    #[error("Duplicate attribute code in model: {0}")]
    DuplicateCode(String),

    #[error("Model code is missing")]
    MissingModelCode,

    #[error("Model document is malformed: {0}")]
    MalformedDocument(String),

    #[error("Failed to parse model: {0}")]
    ParseError(String),
}

/// Result type for schema construction
pub type SchemaResult<T> = Result<T, SchemaError>;
