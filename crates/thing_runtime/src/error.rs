//! Runtime Errors
//!
//! Only programmer errors surface as `Err`. Data faults (unknown codes,
//! unparsable values, rejected timestamps, bridge failures) are logged and
//! absorbed where they happen.

use thiserror::Error;

use thing_types::SchemaError;

use crate::band::Band;

/// Structurally invalid lookup key
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KeyError {
    #[error("Attribute code must not be empty")]
    EmptyCode,

    #[error("Match key must carry at least one constraint")]
    EmptyMatch,

    #[error("Match constraint key is not a semantic identifier: {0}")]
    InvalidConstraint(String),

    #[error("Invalid purpose: {0}")]
    InvalidPurpose(#[from] SchemaError),
}

/// Failure reported by, or on behalf of, a bridge
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("Thing is not bound to a bridge")]
    NotBound,

    #[error("Push completion dropped without being completed")]
    Dropped,

    #[error("Device unreachable")]
    Unreachable,

    #[error("Bridge failure: {0}")]
    Failed(String),
}

/// Errors returned by thing and collection operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThingError {
    #[error("Band {0} is read-only")]
    ReadOnlyBand(Band),

    #[error("Update payload must be a JSON object")]
    NotAnObject,

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type ThingResult<T> = Result<T, ThingError>;
