//! Thing Types - Core type definitions for semantically-typed things
//!
//! This crate contains the pure data structures shared by the runtime:
//!
//! - [`Value`] - attribute and metadata values
//! - [`SemanticId`] - absolute, compacted semantic identifiers
//! - [`AttributeSchema`] - typed attribute descriptions with validation/coercion
//! - [`Timestamp`] and [`should_apply`] - the last-writer-wins merge rule
//! - [`ThingModel`] - immutable models built from semantic documents or TOML

mod attribute;
mod coerce;
mod error;
mod model;
mod semantic;
mod timestamp;
mod value;

pub use attribute::*;
pub use coerce::coerce_format;
pub use error::*;
pub use model::*;
pub use semantic::*;
pub use timestamp::*;
pub use value::*;
