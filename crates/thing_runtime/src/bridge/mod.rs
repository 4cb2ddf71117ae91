//! Bridge Boundary
//!
//! A bridge translates a thing's abstract state to and from a concrete
//! device protocol. The runtime hands it flat value maps to push and
//! receives pulled values through a [`PullSink`]. Both directions come back
//! into the runtime through the dispatcher.

mod memory;

pub use memory::{AckMode, MemoryBridge, MemoryDiscovery};

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::stream::BoxStream;

use thing_types::{Value, ValueMap};

use crate::dispatcher::Dispatcher;
use crate::error::BridgeError;
use crate::thing::Thing;

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// A protocol adapter bound to one device
pub trait Bridge: Send + Sync {
    /// Identifier of the device within its protocol
    fn native_id(&self) -> String;

    /// Called once when a thing binds to this bridge
    fn connect(&self, sink: PullSink) -> Result<(), BridgeError>;

    /// Deliver desired values to the device
    ///
    /// `done` must eventually be completed. Dropping it, or returning `Err`,
    /// counts as a failed push.
    fn push(&self, values: ValueMap, done: PushDone) -> Result<(), BridgeError>;

    /// Ask the device to report its current state through the sink
    fn pull(&self) -> Result<(), BridgeError>;

    fn reachable(&self) -> bool;

    /// Descriptive metadata reported by the device
    fn meta(&self) -> ValueMap;

    fn disconnect(&self) {}
}

/// Parameters passed to a discovery run
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    pub model_code: String,
    pub params: serde_json::Value,
}

/// Finds devices and yields one bridge per device
pub trait Discovery: Send + Sync {
    fn discover(&self, options: &DiscoverOptions) -> BoxStream<'static, Arc<dyn Bridge>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion Handles
// ─────────────────────────────────────────────────────────────────────────────

/// Completion handle for one push
///
/// Completing posts the result back to the owning thing. A handle dropped
/// without completing reports [`BridgeError::Dropped`].
pub struct PushDone {
    thing: Weak<Thing>,
    dispatcher: Dispatcher,
    counted: bool,
    settled: bool,
}

impl PushDone {
    pub(crate) fn new(thing: Weak<Thing>, dispatcher: Dispatcher) -> Self {
        Self {
            thing,
            dispatcher,
            counted: true,
            settled: false,
        }
    }

    /// A push that was not added to the in-flight counter
    pub(crate) fn uncounted(mut self) -> Self {
        self.counted = false;
        self
    }

    pub fn complete(mut self, result: Result<(), BridgeError>) {
        self.settled = true;
        self.settle(result);
    }

    pub fn succeed(self) {
        self.complete(Ok(()));
    }

    pub fn fail(self, error: BridgeError) {
        self.complete(Err(error));
    }

    fn settle(&self, result: Result<(), BridgeError>) {
        let thing = self.thing.clone();
        let counted = self.counted;
        self.dispatcher.post(move || {
            if let Some(thing) = thing.upgrade() {
                thing.push_completed(result, counted);
            }
        });
    }
}

impl Drop for PushDone {
    fn drop(&mut self) {
        if !self.settled {
            self.settled = true;
            self.settle(Err(BridgeError::Dropped));
        }
    }
}

impl std::fmt::Debug for PushDone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushDone")
            .field("counted", &self.counted)
            .field("settled", &self.settled)
            .finish()
    }
}

/// Channel through which a bridge reports device state
///
/// `Some(values)` merges into the input band; `None` means reachability or
/// metadata changed and should be re-read from the bridge.
#[derive(Clone)]
pub struct PullSink {
    thing: Weak<Thing>,
    dispatcher: Dispatcher,
}

impl PullSink {
    pub(crate) fn new(thing: Weak<Thing>, dispatcher: Dispatcher) -> Self {
        Self { thing, dispatcher }
    }

    pub fn pulled(&self, values: Option<ValueMap>) {
        let thing = self.thing.clone();
        self.dispatcher.post(move || {
            if let Some(thing) = thing.upgrade() {
                thing.handle_pulled(values);
            }
        });
    }
}

impl std::fmt::Debug for PullSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullSink")
            .field("alive", &(self.thing.strong_count() > 0))
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Binding
// ─────────────────────────────────────────────────────────────────────────────

/// Per-attribute enumeration translation between thing and device values
#[derive(Debug, Clone, Default)]
pub struct EnumRemap {
    outgoing: HashMap<String, HashMap<String, Value>>,
    incoming: HashMap<String, HashMap<String, Value>>,
}

impl EnumRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map thing value `from` to device value `to` for attribute `code`
    pub fn with(mut self, code: &str, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        let (from, to) = (from.into(), to.into());
        self.incoming
            .entry(code.to_string())
            .or_default()
            .insert(to.remap_key(), from.clone());
        self.outgoing
            .entry(code.to_string())
            .or_default()
            .insert(from.remap_key(), to);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }

    /// Translate a push payload to device values
    pub fn to_device(&self, values: ValueMap) -> ValueMap {
        Self::apply(&self.outgoing, values)
    }

    /// Translate pulled device values back to thing values
    pub fn from_device(&self, values: ValueMap) -> ValueMap {
        Self::apply(&self.incoming, values)
    }

    fn apply(table: &HashMap<String, HashMap<String, Value>>, values: ValueMap) -> ValueMap {
        if table.is_empty() {
            return values;
        }
        values
            .into_iter()
            .map(|(code, value)| {
                let mapped = table
                    .get(&code)
                    .and_then(|t| t.get(&value.remap_key()))
                    .cloned()
                    .unwrap_or(value);
                (code, mapped)
            })
            .collect()
    }
}

/// A thing's connection to its bridge
#[derive(Clone)]
pub struct Binding {
    pub bridge: Arc<dyn Bridge>,
    pub remap: EnumRemap,
}

impl Binding {
    pub fn new(bridge: Arc<dyn Bridge>) -> Self {
        Self {
            bridge,
            remap: EnumRemap::default(),
        }
    }

    pub fn with_remap(mut self, remap: EnumRemap) -> Self {
        self.remap = remap;
        self
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("native_id", &self.bridge.native_id())
            .field("remap", &self.remap)
            .finish()
    }
}
