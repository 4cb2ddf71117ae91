//! Bulk commands issued on a collection
//!
//! A persisting collection records its commands and replays them, in
//! issuance order, on every member that joins later.

use std::sync::Arc;

use tracing::warn;

use thing_types::{Value, ValueMap};

use crate::band::{Band, UpdateOptions};
use crate::event::AttributeCallback;
use crate::key::Key;
use crate::thing::Thing;

#[derive(Clone)]
pub enum Command {
    Set {
        key: Key,
        value: Value,
    },
    Update {
        band: Band,
        values: ValueMap,
        options: UpdateOptions,
    },
    Pull,
    Tag(String),
    Untag(String),
    Disconnect,
    On {
        key: Key,
        callback: AttributeCallback,
    },
}

impl Command {
    /// A later set supersedes every earlier recorded set
    pub fn is_set(&self) -> bool {
        matches!(self, Command::Set { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "set",
            Command::Update { .. } => "update",
            Command::Pull => "pull",
            Command::Tag(_) => "tag",
            Command::Untag(_) => "untag",
            Command::Disconnect => "disconnect",
            Command::On { .. } => "on",
        }
    }

    /// Run against one thing; per-thing failures are logged
    pub fn apply(&self, thing: &Arc<Thing>) {
        let result = match self {
            Command::Set { key, value } => thing.set(key.clone(), value.clone()).map(|_| ()),
            Command::Update {
                band,
                values,
                options,
            } => thing
                .update(*band, values.clone(), options.clone())
                .map(|_| ()),
            Command::Pull => {
                thing.pull();
                Ok(())
            }
            Command::Tag(tag) => {
                thing.tag(tag);
                Ok(())
            }
            Command::Untag(tag) => {
                thing.untag(tag);
                Ok(())
            }
            Command::Disconnect => {
                thing.disconnect();
                Ok(())
            }
            Command::On { key, callback } => thing
                .on_attribute(key.clone(), callback.clone())
                .map(|_| ()),
        };
        if let Err(e) = result {
            warn!(thing_id = %thing.thing_id(), "Collection {} failed: {}", self.name(), e);
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Set { key, value } => write!(f, "Set({} = {})", key, value),
            Command::Update { band, values, .. } => write!(f, "Update({}, {:?})", band, values),
            Command::Tag(tag) => write!(f, "Tag({})", tag),
            Command::Untag(tag) => write!(f, "Untag({})", tag),
            Command::On { key, .. } => write!(f, "On({})", key),
            other => f.write_str(other.name()),
        }
    }
}
