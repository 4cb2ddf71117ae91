//! Thing
//!
//! A thing is one addressable device instance: an immutable model plus
//! mutable state split into bands. All mutation goes through [`Thing::update`]
//! (see `update.rs`); the push/pull protocol with the bound bridge lives in
//! `push.rs`.
//!
//! Things are shared as `Arc<Thing>`. The internal lock is never held while
//! listeners or bridges run.

mod push;
mod update;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use thing_types::{ThingModel, Timestamp, Value, meta_key, value_map_to_json};

use crate::band::{Band, BandState, ConnectionState, OutputState, UpdateOptions};
use crate::bridge::{Binding, PullSink};
use crate::dispatcher::Dispatcher;
use crate::error::ThingResult;
use crate::event::{
    AttributeCallback, ListenerId, Listeners, Subscription, ThingCallback, ThingEvent,
};
use crate::key::{self, Key, Mode};

/// Mutable per-thing state, guarded by the thing's lock
#[derive(Default)]
struct ThingState {
    thing_id: String,
    input: BandState,
    output: OutputState,
    meta: BandState,
    connection: ConnectionState,
    tags: BTreeSet<String>,
    binding: Option<Binding>,
    transaction: Option<Transaction>,
}

/// Changes accumulated by an open non-immediate transaction
struct Transaction {
    immediate: bool,
    pending: BTreeMap<Band, Pending>,
}

#[derive(Default)]
struct Pending {
    changed: Vec<String>,
    notify: bool,
}

impl Transaction {
    fn record(&mut self, band: Band, changed: &[String], notify: bool) {
        let pending = self.pending.entry(band).or_default();
        for code in changed {
            if !pending.changed.contains(code) {
                pending.changed.push(code.clone());
            }
        }
        pending.notify |= notify;
    }
}

pub struct Thing {
    model: Arc<ThingModel>,
    dispatcher: Dispatcher,
    state: Mutex<ThingState>,
    listeners: Listeners<Subscription>,
    weak: Weak<Thing>,
}

impl Thing {
    /// Create an unbound thing with the model's initial metadata
    ///
    /// The thing carries a provisional id until [`Thing::bind`] assigns the
    /// canonical one.
    pub fn new(model: Arc<ThingModel>, dispatcher: Dispatcher) -> Arc<Self> {
        let state = ThingState {
            thing_id: format!("urn:iotdb:unbound:{}", Uuid::new_v4()),
            meta: BandState {
                values: model.meta().clone(),
                timestamp: None,
            },
            ..Default::default()
        };
        Arc::new_cyclic(|weak| Self {
            model,
            dispatcher,
            state: Mutex::new(state),
            listeners: Listeners::new(),
            weak: weak.clone(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity & Metadata
    // ─────────────────────────────────────────────────────────────────────────

    pub fn thing_id(&self) -> String {
        self.state.lock().thing_id.clone()
    }

    pub fn model(&self) -> &Arc<ThingModel> {
        &self.model
    }

    pub fn model_code(&self) -> &str {
        self.model.model_code()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Display name: `schema:name` metadata, else the model name, else the model code
    pub fn name(&self) -> String {
        let state = self.state.lock();
        state
            .meta
            .get("schema:name")
            .and_then(Value::as_str)
            .or_else(|| self.model.name())
            .unwrap_or_else(|| self.model.model_code())
            .to_string()
    }

    pub fn zones(&self) -> Vec<String> {
        strings(self.state.lock().meta.get("iot:zone"))
    }

    pub fn facets(&self) -> Vec<String> {
        strings(self.state.lock().meta.get("iot:facet"))
    }

    pub fn reachable(&self) -> bool {
        self.state.lock().connection.reachable
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().binding.is_some()
    }

    /// Snapshot of one band
    pub fn band(&self, band: Band) -> BandState {
        let state = self.state.lock();
        match band {
            Band::Input => state.input.clone(),
            Band::Output => state.output.band.clone(),
            Band::Meta => state.meta.clone(),
            Band::Connection => state.connection.band(),
        }
    }

    /// Number of pushes handed to the bridge and not yet completed
    pub fn pending_pushes(&self) -> usize {
        self.state.lock().output.pushes
    }

    /// Metadata value under a normalised key
    pub fn meta(&self, key: &str) -> Option<Value> {
        self.state.lock().meta.get(&meta_key(key)).cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tags
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a transient tag; tags are never persisted or pushed
    pub fn tag(&self, tag: &str) -> bool {
        let added = self.state.lock().tags.insert(tag.to_string());
        if added {
            self.schedule(vec![ThingEvent::Tags]);
        }
        added
    }

    pub fn untag(&self, tag: &str) -> bool {
        let removed = self.state.lock().tags.remove(tag);
        if removed {
            self.schedule(vec![ThingEvent::Tags]);
        }
        removed
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.state.lock().tags.contains(tag)
    }

    pub fn tags(&self) -> Vec<String> {
        self.state.lock().tags.iter().cloned().collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attribute Access
    // ─────────────────────────────────────────────────────────────────────────

    /// Current input value of the attribute `key` resolves to
    ///
    /// A code that matches no attribute is looked up in the metadata band.
    pub fn get(&self, key: impl Into<Key>) -> ThingResult<Option<Value>> {
        let key = key.into();
        if let Some(attribute) = key::find(&self.model, &key, Mode::Get)? {
            return Ok(self.state.lock().input.get(attribute.code()).cloned());
        }
        match &key {
            Key::Code(code) => Ok(self.meta(code)),
            _ => {
                debug!(thing_id = %self.thing_id(), key = %key, "get: no attribute matches");
                Ok(None)
            }
        }
    }

    /// Request a new value for the attribute `key` resolves to
    ///
    /// Returns whether the desired value changed. The push to the bridge is
    /// dispatched after this call returns.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> ThingResult<bool> {
        let key = key.into();
        let Some(attribute) = key::find(&self.model, &key, Mode::Set)? else {
            warn!(thing_id = %self.thing_id(), key = %key, "set: no attribute matches");
            return Ok(false);
        };
        let mut values = thing_types::ValueMap::new();
        values.insert(attribute.code().to_string(), value.into());
        let changed = self.update(Band::Output, values, UpdateOptions::default())?;
        Ok(!changed.is_empty())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to input-band changes of the attribute `key` resolves to
    pub fn on<F>(&self, key: impl Into<Key>, callback: F) -> ThingResult<Option<ListenerId>>
    where
        F: Fn(&Arc<Thing>, &str, &Value) + Send + Sync + 'static,
    {
        self.on_attribute(key.into(), Arc::new(callback))
    }

    pub(crate) fn on_attribute(
        &self,
        key: Key,
        callback: AttributeCallback,
    ) -> ThingResult<Option<ListenerId>> {
        let Some(attribute) = key::find(&self.model, &key, Mode::On)? else {
            warn!(thing_id = %self.thing_id(), key = %key, "on: no attribute matches");
            return Ok(None);
        };
        Ok(Some(self.listeners.add(Subscription::Attribute {
            code: attribute.code().to_string(),
            callback,
        })))
    }

    /// Subscribe to band-level change events
    pub fn on_band<F>(&self, band: Band, callback: F) -> ListenerId
    where
        F: Fn(&Arc<Thing>, &ThingEvent) + Send + Sync + 'static,
    {
        self.listeners.add(Subscription::Band {
            band,
            callback: Arc::new(callback),
        })
    }

    /// Subscribe to every event
    pub fn on_event<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Arc<Thing>, &ThingEvent) + Send + Sync + 'static,
    {
        self.on_event_arc(Arc::new(callback))
    }

    pub(crate) fn on_event_arc(&self, callback: ThingCallback) -> ListenerId {
        self.listeners.add(Subscription::All(callback))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Schedule one notification round on the dispatcher
    fn schedule(&self, events: Vec<ThingEvent>) {
        if events.is_empty() {
            return;
        }
        let weak = self.weak.clone();
        self.dispatcher.post(move || {
            if let Some(thing) = weak.upgrade() {
                thing.emit_all(&events);
            }
        });
    }

    /// Deliver events to listeners now; only called from dispatcher tasks
    fn emit_all(&self, events: &[ThingEvent]) {
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        let subscriptions = self.listeners.snapshot();
        for event in events {
            for subscription in &subscriptions {
                subscription.deliver(&this, event);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Binding
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach a bridge and adopt the canonical id
    ///
    /// Reachability and bridge metadata are read immediately.
    pub fn bind(&self, thing_id: impl Into<String>, binding: Binding) -> ThingResult<()> {
        let thing_id = thing_id.into();
        let bridge = binding.bridge.clone();
        {
            let mut state = self.state.lock();
            state.thing_id = thing_id.clone();
            state.binding = Some(binding);
        }

        let sink = PullSink::new(self.weak.clone(), self.dispatcher.clone());
        if let Err(e) = bridge.connect(sink) {
            self.state.lock().binding = None;
            return Err(e.into());
        }

        let mut identity = thing_types::ValueMap::new();
        identity.insert("thing-id".to_string(), Value::String(thing_id.clone()));
        self.update(Band::Meta, identity, UpdateOptions::default())?;

        info!(thing_id = %thing_id, native_id = %bridge.native_id(), "Thing bound");
        self.refresh_from_bridge();
        Ok(())
    }

    /// Unbind from the bridge and mark the thing unreachable
    ///
    /// Collections holding the thing drop it when the `Disconnected` event
    /// is delivered.
    pub fn disconnect(&self) -> bool {
        let (binding, thing_id) = {
            let mut state = self.state.lock();
            let binding = state.binding.take();
            if binding.is_some() {
                state.connection.reachable = false;
                state.connection.timestamp = Some(Timestamp::now());
            }
            (binding, state.thing_id.clone())
        };
        let Some(binding) = binding else {
            debug!(thing_id = %thing_id, "disconnect: not bound");
            return false;
        };

        binding.bridge.disconnect();
        info!(thing_id = %thing_id, "Thing disconnected");
        self.schedule(vec![
            ThingEvent::Band {
                band: Band::Connection,
                changed: vec!["iot:reachable".to_string()],
            },
            ThingEvent::Disconnected,
        ]);
        true
    }

    /// JSON snapshot of identity, bands and tags
    pub fn state_json(&self) -> serde_json::Value {
        let state = self.state.lock();
        json!({
            "thing-id": state.thing_id,
            "model-code": self.model.model_code(),
            "istate": value_map_to_json(&state.input.snapshot()),
            "ostate": value_map_to_json(&state.output.band.snapshot()),
            "meta": value_map_to_json(&state.meta.snapshot()),
            "connection": value_map_to_json(&state.connection.band().snapshot()),
            "tags": state.tags.iter().collect::<Vec<_>>(),
        })
    }
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("thing_id", &self.thing_id())
            .field("model", &self.model.model_code())
            .finish()
    }
}

/// A string or array of strings as a list
fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::AckMode;
    use crate::testing::{bound_lamp, lamp, record, values};

    #[test]
    fn test_provisional_id_until_bound() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        assert!(thing.thing_id().starts_with("urn:iotdb:unbound:"));
        assert!(!thing.is_bound());
        assert!(!thing.reachable());

        let (bound, _) = bound_lamp(&dispatcher, "lamp-1", AckMode::Auto);
        assert_eq!(bound.thing_id(), "urn:test:lamp-1");
        assert!(bound.reachable());
        assert_eq!(
            bound.meta("thing-id"),
            Some(Value::from("urn:test:lamp-1"))
        );
    }

    #[test]
    fn test_bind_stamps_identity_through_meta_update() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let events = record(&thing);
        assert!(thing.band(Band::Meta).timestamp.is_none());

        let bridge = crate::bridge::MemoryBridge::new("lamp-9").into_arc();
        thing
            .bind("urn:test:lamp-9", Binding::new(bridge))
            .unwrap();
        assert_eq!(thing.meta("thing-id"), Some(Value::from("urn:test:lamp-9")));
        assert!(thing.band(Band::Meta).timestamp.is_some());

        dispatcher.run_until_idle();
        assert!(events.lock().contains(&ThingEvent::Band {
            band: Band::Meta,
            changed: vec!["iot:thing-id".to_string()],
        }));
    }

    #[test]
    fn test_model_metadata_conveniences() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        assert_eq!(thing.name(), "Lamp");
        assert_eq!(thing.facets(), vec!["iot-facet:lighting".to_string()]);
        assert!(thing.zones().is_empty());
        assert_eq!(thing.model_code(), "lamp");

        thing
            .update(
                Band::Meta,
                values([("zone", Value::from(vec!["Kitchen", "Downstairs"]))]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(thing.zones(), vec!["Kitchen", "Downstairs"]);
    }

    #[test]
    fn test_get_falls_back_to_metadata() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        thing
            .update(
                Band::Meta,
                values([("name", Value::from("A"))]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(thing.get("name").unwrap(), Some(Value::from("A")));
        assert_eq!(thing.get("manufacturer").unwrap(), None);
    }

    #[test]
    fn test_get_reads_input_band() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        thing
            .update(
                Band::Input,
                values([("brightness", Value::Int(40))]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(thing.get("brightness").unwrap(), Some(Value::Int(40)));
        assert_eq!(
            thing.get(Key::purpose("brightness").unwrap()).unwrap(),
            Some(Value::Int(40))
        );
        assert!(thing.get("").is_err());
    }

    #[test]
    fn test_set_unknown_key_is_noop() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        assert_eq!(thing.set("volume", 3), Ok(false));
        assert!(thing.band(Band::Output).values.is_empty());
        assert_eq!(thing.pending_pushes(), 0);
    }

    #[test]
    fn test_set_writes_output_band() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        assert_eq!(thing.set("brightness", 250), Ok(true));
        assert_eq!(
            thing.band(Band::Output).get("brightness"),
            Some(&Value::Int(100))
        );
        // same desired value again changes nothing
        assert_eq!(thing.set("brightness", 100), Ok(false));
    }

    #[test]
    fn test_on_delivers_after_update() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = thing
            .on("on", move |_, code, value| {
                sink.lock().push((code.to_string(), value.clone()))
            })
            .unwrap()
            .unwrap();

        thing
            .update(
                Band::Input,
                values([("on", Value::Bool(true))]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert!(seen.lock().is_empty());
        dispatcher.run_until_idle();
        assert_eq!(*seen.lock(), vec![("on".to_string(), Value::Bool(true))]);

        assert!(thing.off(id));
        thing
            .update(
                Band::Input,
                values([("on", Value::Bool(false))]),
                UpdateOptions::default(),
            )
            .unwrap();
        dispatcher.run_until_idle();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_on_unknown_key() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        assert_eq!(thing.on("volume", |_, _, _| {}), Ok(None));
    }

    #[test]
    fn test_tags_emit_events() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let events = record(&thing);

        assert!(thing.tag("favourite"));
        assert!(!thing.tag("favourite"));
        assert!(thing.has_tag("favourite"));
        assert!(thing.untag("favourite"));
        assert!(!thing.untag("favourite"));
        dispatcher.run_until_idle();

        assert_eq!(*events.lock(), vec![ThingEvent::Tags, ThingEvent::Tags]);
        assert!(thing.tags().is_empty());
    }

    #[test]
    fn test_disconnect() {
        let dispatcher = Dispatcher::new();
        let (thing, _bridge) = bound_lamp(&dispatcher, "lamp-1", AckMode::Auto);
        let events = record(&thing);

        assert!(thing.disconnect());
        assert!(!thing.disconnect());
        assert!(!thing.reachable());
        assert!(!thing.is_bound());

        dispatcher.run_until_idle();
        assert_eq!(events.lock().last(), Some(&ThingEvent::Disconnected));
    }

    #[test]
    fn test_state_json() {
        let dispatcher = Dispatcher::new();
        let (thing, _bridge) = bound_lamp(&dispatcher, "lamp-1", AckMode::Auto);
        thing.tag("kitchen");
        let json = thing.state_json();
        assert_eq!(json["thing-id"], "urn:test:lamp-1");
        assert_eq!(json["model-code"], "lamp");
        assert_eq!(json["meta"]["schema:name"], "Lamp");
        assert_eq!(json["connection"]["iot:reachable"], true);
        assert_eq!(json["tags"][0], "kitchen");
    }
}
