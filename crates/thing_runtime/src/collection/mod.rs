//! Thing Collections
//!
//! A [`ThingArray`] is an ordered, duplicate-free set of things with change
//! events. Arrays can be derived from other arrays by filtering or merging;
//! derived arrays re-run [`reconcile`] whenever their sources change, and
//! filtered views also whenever a source member's metadata or tags change.
//!
//! Derived views hold their sources strongly. Sources only hold weak
//! references back, so dropping a view unsubscribes it.

mod command;
mod filter;
mod reconcile;

pub use command::Command;
pub use filter::ThingFilter;
pub use reconcile::{Delta, reconcile};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use thing_types::{Value, ValueMap};

use crate::band::{Band, UpdateOptions};
use crate::dispatcher::Dispatcher;
use crate::error::{ThingError, ThingResult};
use crate::event::{
    ArrayCallback, ArrayEvent, ArrayEventKind, ListenerId, Listeners, ThingCallback, ThingEvent,
};
use crate::key::Key;
use crate::thing::Thing;

enum Derivation {
    Filter {
        source: ThingArray,
        filter: ThingFilter,
    },
    Merge {
        left: ThingArray,
        right: ThingArray,
    },
}

struct ArrayInner {
    dispatcher: Dispatcher,
    persist: bool,
    members: Mutex<Vec<Arc<Thing>>>,
    /// Thing listeners keyed by thing id
    watches: Mutex<HashMap<String, (Weak<Thing>, ListenerId)>>,
    commands: Mutex<Vec<Command>>,
    listeners: Listeners<(ArrayEventKind, ArrayCallback)>,
    derivation: Option<Derivation>,
    /// Our listeners on the arrays we derive from
    upstream: Mutex<Vec<(ThingArray, ListenerId)>>,
}

impl Drop for ArrayInner {
    fn drop(&mut self) {
        for (source, id) in self.upstream.get_mut().drain(..) {
            source.off(id);
        }
        for (_, (thing, id)) in self.watches.get_mut().drain() {
            if let Some(thing) = thing.upgrade() {
                thing.off(id);
            }
        }
    }
}

#[derive(Clone)]
pub struct ThingArray {
    inner: Arc<ArrayInner>,
}

impl ThingArray {
    /// A plain array; commands apply to current members only
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::build(dispatcher, false, None)
    }

    /// An array that records commands and replays them on future members
    pub fn persisting(dispatcher: Dispatcher) -> Self {
        Self::build(dispatcher, true, None)
    }

    fn build(dispatcher: Dispatcher, persist: bool, derivation: Option<Derivation>) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                dispatcher,
                persist,
                members: Mutex::new(Vec::new()),
                watches: Mutex::new(HashMap::new()),
                commands: Mutex::new(Vec::new()),
                listeners: Listeners::new(),
                derivation,
                upstream: Mutex::new(Vec::new()),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a thing; a thing already present is a no-op
    pub fn push(&self, thing: Arc<Thing>) -> bool {
        if !self.add_member(thing.clone()) {
            debug!(thing_id = %thing.thing_id(), "push: already a member");
            return false;
        }
        self.emit(vec![
            ArrayEvent::Thing(thing.clone()),
            ArrayEvent::Added(thing),
            ArrayEvent::Changed,
        ]);
        true
    }

    /// Remove the member with `thing_id`
    pub fn remove(&self, thing_id: &str) -> Option<Arc<Thing>> {
        let thing = self.remove_member(thing_id)?;
        self.emit(vec![ArrayEvent::Removed(thing.clone()), ArrayEvent::Changed]);
        Some(thing)
    }

    fn add_member(&self, thing: Arc<Thing>) -> bool {
        let thing_id = thing.thing_id();
        {
            let mut members = self.inner.members.lock();
            if members.iter().any(|m| m.thing_id() == thing_id) {
                return false;
            }
            members.push(thing.clone());
        }
        if !self.is_filter() {
            self.watch(&thing);
        }

        let commands = self.inner.commands.lock().clone();
        for command in &commands {
            command.apply(&thing);
        }
        true
    }

    fn remove_member(&self, thing_id: &str) -> Option<Arc<Thing>> {
        let thing = {
            let mut members = self.inner.members.lock();
            let index = members.iter().position(|m| m.thing_id() == thing_id)?;
            members.remove(index)
        };
        if !self.is_filter() {
            self.unwatch(thing_id);
        }
        Some(thing)
    }

    fn is_filter(&self) -> bool {
        matches!(self.inner.derivation, Some(Derivation::Filter { .. }))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Member Watches
    // ─────────────────────────────────────────────────────────────────────────

    fn watch(&self, thing: &Arc<Thing>) {
        let thing_id = thing.thing_id();
        if self.inner.watches.lock().contains_key(&thing_id) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let callback: ThingCallback = Arc::new(move |thing: &Arc<Thing>, event: &ThingEvent| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let array = ThingArray { inner };
            if *event == ThingEvent::Disconnected {
                array.remove(&thing.thing_id());
            } else if event.affects_filters() && array.is_filter() {
                array.recompute();
            }
        });
        let id = thing.on_event_arc(callback);
        self.inner
            .watches
            .lock()
            .insert(thing_id, (Arc::downgrade(thing), id));
    }

    fn unwatch(&self, thing_id: &str) {
        let removed = self.inner.watches.lock().remove(thing_id);
        if let Some((thing, id)) = removed {
            if let Some(thing) = thing.upgrade() {
                thing.off(id);
            }
        }
    }

    /// Watch exactly `things`
    fn sync_watches(&self, things: &[Arc<Thing>]) {
        let wanted: HashSet<String> = things.iter().map(|t| t.thing_id()).collect();
        let stale: Vec<String> = self
            .inner
            .watches
            .lock()
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        for thing_id in stale {
            self.unwatch(&thing_id);
        }
        for thing in things {
            self.watch(thing);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Derived Views
    // ─────────────────────────────────────────────────────────────────────────

    /// A persisting view of the members matching `filter`
    pub fn filter(&self, filter: ThingFilter) -> ThingArray {
        let view = Self::build(
            self.inner.dispatcher.clone(),
            true,
            Some(Derivation::Filter {
                source: self.clone(),
                filter,
            }),
        );
        view.follow(self);
        view.recompute();
        view
    }

    /// A persisting view of this array's members followed by `other`'s
    pub fn merge(&self, other: &ThingArray) -> ThingArray {
        let view = Self::build(
            self.inner.dispatcher.clone(),
            true,
            Some(Derivation::Merge {
                left: self.clone(),
                right: other.clone(),
            }),
        );
        view.follow(self);
        view.follow(other);
        view.recompute();
        view
    }

    fn follow(&self, source: &ThingArray) {
        let weak = Arc::downgrade(&self.inner);
        let id = source.on_event(ArrayEventKind::Changed, move |_| {
            if let Some(inner) = weak.upgrade() {
                ThingArray { inner }.recompute();
            }
        });
        self.inner.upstream.lock().push((source.clone(), id));
    }

    /// Bring a derived view in line with its sources
    ///
    /// Always ends with a `Changed` event so views stacked on this one
    /// re-run as well.
    fn recompute(&self) {
        let Some(derivation) = &self.inner.derivation else {
            return;
        };
        let proposed: Vec<Arc<Thing>> = match derivation {
            Derivation::Filter { source, filter } => {
                let all = source.things();
                self.sync_watches(&all);
                all.into_iter().filter(|t| filter.matches(t)).collect()
            }
            Derivation::Merge { left, right } => {
                let mut all = left.things();
                all.extend(right.things());
                all
            }
        };

        let current = self.things();
        let delta = reconcile(&current, &proposed, |t| t.thing_id());

        let mut events = Vec::new();
        for thing in delta.remove {
            if let Some(thing) = self.remove_member(&thing.thing_id()) {
                events.push(ArrayEvent::Removed(thing));
            }
        }
        for thing in delta.add {
            if self.add_member(thing.clone()) {
                events.push(ArrayEvent::Thing(thing.clone()));
                events.push(ArrayEvent::Added(thing));
            }
        }
        events.push(ArrayEvent::Changed);
        self.emit(events);
    }

    /// Shortcut for `filter(ThingFilter::new().with_id(..))`
    pub fn with_id(&self, thing_id: &str) -> ThingArray {
        self.filter(ThingFilter::new().with_id(thing_id))
    }

    pub fn with_model_code(&self, model_code: &str) -> ThingArray {
        self.filter(ThingFilter::new().with_model_code(model_code))
    }

    pub fn with_name(&self, pattern: &str) -> ThingArray {
        self.filter(ThingFilter::new().with_name(pattern))
    }

    pub fn with_zone(&self, zone: &str) -> ThingArray {
        self.filter(ThingFilter::new().with_zone(zone))
    }

    pub fn with_facet(&self, facet: &str) -> ThingArray {
        self.filter(ThingFilter::new().with_facet(facet))
    }

    pub fn with_tag(&self, tag: &str) -> ThingArray {
        self.filter(ThingFilter::new().with_tag(tag))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    fn command(&self, command: Command) {
        if self.inner.persist {
            let mut commands = self.inner.commands.lock();
            if command.is_set() {
                commands.retain(|c| !c.is_set());
            }
            commands.push(command.clone());
        }
        for thing in self.things() {
            command.apply(&thing);
        }
    }

    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> ThingResult<()> {
        let key = key.into();
        key.validate()?;
        self.command(Command::Set {
            key,
            value: value.into(),
        });
        Ok(())
    }

    pub fn update(&self, band: Band, values: ValueMap, options: UpdateOptions) -> ThingResult<()> {
        if band == Band::Connection {
            return Err(ThingError::ReadOnlyBand(band));
        }
        self.command(Command::Update {
            band,
            values,
            options,
        });
        Ok(())
    }

    pub fn pull(&self) {
        self.command(Command::Pull);
    }

    pub fn tag(&self, tag: &str) {
        self.command(Command::Tag(tag.to_string()));
    }

    pub fn untag(&self, tag: &str) {
        self.command(Command::Untag(tag.to_string()));
    }

    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Subscribe to input changes of `key` on every member, present and future
    pub fn on<F>(&self, key: impl Into<Key>, callback: F) -> ThingResult<()>
    where
        F: Fn(&Arc<Thing>, &str, &Value) + Send + Sync + 'static,
    {
        let key = key.into();
        key.validate()?;
        self.command(Command::On {
            key,
            callback: Arc::new(callback),
        });
        Ok(())
    }

    /// Commands recorded for replay
    pub fn commands(&self) -> Vec<Command> {
        self.inner.commands.lock().clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to one kind of event
    ///
    /// `Thing` listeners are called once for every current member (after
    /// this call returns) and then for every member added later.
    pub fn on_event<F>(&self, kind: ArrayEventKind, callback: F) -> ListenerId
    where
        F: Fn(&ArrayEvent) + Send + Sync + 'static,
    {
        let callback: ArrayCallback = Arc::new(callback);
        let id = self.inner.listeners.add((kind, callback.clone()));

        if kind == ArrayEventKind::Thing {
            let members = self.things();
            self.inner.dispatcher.post(move || {
                for thing in members {
                    callback(&ArrayEvent::Thing(thing));
                }
            });
        }
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    fn emit(&self, events: Vec<ArrayEvent>) {
        if events.is_empty() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.dispatcher.post(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let listeners = inner.listeners.snapshot();
            for event in &events {
                for (kind, callback) in &listeners {
                    if *kind == event.kind() {
                        callback(event);
                    }
                }
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn things(&self) -> Vec<Arc<Thing>> {
        self.inner.members.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.members.lock().is_empty()
    }

    pub fn first(&self) -> Option<Arc<Thing>> {
        self.inner.members.lock().first().cloned()
    }

    pub fn get(&self, thing_id: &str) -> Option<Arc<Thing>> {
        self.inner
            .members
            .lock()
            .iter()
            .find(|t| t.thing_id() == thing_id)
            .cloned()
    }

    pub fn any(&self, predicate: impl Fn(&Thing) -> bool) -> bool {
        self.things().iter().any(|t| predicate(t.as_ref()))
    }

    pub fn names(&self) -> Vec<String> {
        self.things().iter().map(|t| t.name()).collect()
    }

    pub fn is_persisting(&self) -> bool {
        self.inner.persist
    }
}

impl std::fmt::Debug for ThingArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThingArray")
            .field("len", &self.len())
            .field("persist", &self.inner.persist)
            .field("derived", &self.inner.derivation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::AckMode;
    use crate::testing::{bound_lamp, lamp, values};

    fn counter(array: &ThingArray, kind: ArrayEventKind) -> Arc<Mutex<usize>> {
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        array.on_event(kind, move |_| *sink.lock() += 1);
        count
    }

    fn set_zone(thing: &Arc<Thing>, zone: &str) {
        thing
            .update(Band::Meta, values([("zone", Value::from(zone))]), UpdateOptions::default())
            .unwrap();
    }

    #[test]
    fn test_duplicate_push_is_noop() {
        let dispatcher = Dispatcher::new();
        let array = ThingArray::new(dispatcher.clone());
        let added = counter(&array, ArrayEventKind::Added);
        let thing = lamp(&dispatcher);

        assert!(array.push(thing.clone()));
        assert!(!array.push(thing));
        dispatcher.run_until_idle();

        assert_eq!(array.len(), 1);
        assert_eq!(*added.lock(), 1);
    }

    #[test]
    fn test_filtered_view_add_and_remove_notify_once() {
        let dispatcher = Dispatcher::new();
        let source = ThingArray::persisting(dispatcher.clone());
        let view = source.with_zone("Kitchen");
        let added = counter(&view, ArrayEventKind::Added);
        let removed = counter(&view, ArrayEventKind::Removed);
        dispatcher.run_until_idle();

        let thing = lamp(&dispatcher);
        set_zone(&thing, "Kitchen");
        source.push(thing.clone());
        source.push(lamp(&dispatcher));
        dispatcher.run_until_idle();

        assert_eq!(view.len(), 1);
        assert_eq!(*added.lock(), 1);
        assert_eq!(*removed.lock(), 0);

        set_zone(&thing, "Hall");
        dispatcher.run_until_idle();

        assert!(view.is_empty());
        assert_eq!(*added.lock(), 1);
        assert_eq!(*removed.lock(), 1);
    }

    #[test]
    fn test_view_tracks_tags() {
        let dispatcher = Dispatcher::new();
        let source = ThingArray::new(dispatcher.clone());
        let thing = lamp(&dispatcher);
        source.push(thing.clone());
        let favourites = source.with_tag("fav");
        dispatcher.run_until_idle();
        assert!(favourites.is_empty());

        thing.tag("fav");
        dispatcher.run_until_idle();
        assert_eq!(favourites.len(), 1);
    }

    #[test]
    fn test_view_always_emits_changed() {
        let dispatcher = Dispatcher::new();
        let source = ThingArray::new(dispatcher.clone());
        let view = source.with_zone("Kitchen");
        let changed = counter(&view, ArrayEventKind::Changed);
        dispatcher.run_until_idle();
        let before = *changed.lock();

        // membership of the view does not change, the event still fires
        source.push(lamp(&dispatcher));
        dispatcher.run_until_idle();
        assert!(view.is_empty());
        assert_eq!(*changed.lock(), before + 1);
    }

    #[test]
    fn test_stacked_views() {
        let dispatcher = Dispatcher::new();
        let source = ThingArray::new(dispatcher.clone());
        let lamps = source.with_model_code("lamp").with_zone("Kitchen");

        let thing = lamp(&dispatcher);
        set_zone(&thing, "Kitchen");
        source.push(thing);
        dispatcher.run_until_idle();
        assert_eq!(lamps.len(), 1);
    }

    #[test]
    fn test_merge_is_union_in_order() {
        let dispatcher = Dispatcher::new();
        let a = ThingArray::new(dispatcher.clone());
        let b = ThingArray::new(dispatcher.clone());
        let (x, y, z) = (lamp(&dispatcher), lamp(&dispatcher), lamp(&dispatcher));
        a.push(x.clone());
        a.push(y.clone());
        b.push(y.clone());
        b.push(z.clone());

        let merged = a.merge(&b);
        let ids: Vec<String> = merged.things().iter().map(|t| t.thing_id()).collect();
        assert_eq!(ids, vec![x.thing_id(), y.thing_id(), z.thing_id()]);

        a.remove(&x.thing_id());
        dispatcher.run_until_idle();
        assert_eq!(merged.len(), 2);
        assert!(merged.get(&x.thing_id()).is_none());
    }

    #[test]
    fn test_persisted_set_replays_on_new_members() {
        let dispatcher = Dispatcher::new();
        let array = ThingArray::persisting(dispatcher.clone());
        array.set("brightness", 10).unwrap();
        array.tag("managed");
        array.set("on", true).unwrap();

        let commands = array.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].name(), "tag");
        assert_eq!(commands[1].name(), "set");

        let thing = lamp(&dispatcher);
        array.push(thing.clone());
        assert!(thing.has_tag("managed"));
        assert_eq!(thing.band(Band::Output).get("on"), Some(&Value::Bool(true)));
        assert_eq!(thing.band(Band::Output).get("brightness"), None);
    }

    #[test]
    fn test_plain_array_does_not_record() {
        let dispatcher = Dispatcher::new();
        let array = ThingArray::new(dispatcher.clone());
        array.tag("managed");
        assert!(array.commands().is_empty());

        let thing = lamp(&dispatcher);
        array.push(thing.clone());
        assert!(!thing.has_tag("managed"));
    }

    #[test]
    fn test_persisted_on_reaches_future_members() {
        let dispatcher = Dispatcher::new();
        let array = ThingArray::persisting(dispatcher.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        array
            .on("on", move |_, _, value| sink.lock().push(value.clone()))
            .unwrap();

        let thing = lamp(&dispatcher);
        array.push(thing.clone());
        thing
            .update(Band::Input, values([("on", Value::Bool(true))]), UpdateOptions::default())
            .unwrap();
        dispatcher.run_until_idle();
        assert_eq!(*seen.lock(), vec![Value::Bool(true)]);
    }

    #[test]
    fn test_invalid_bulk_key_rejected() {
        let dispatcher = Dispatcher::new();
        let array = ThingArray::persisting(dispatcher);
        assert!(array.set("", 1).is_err());
        assert!(array.commands().is_empty());
        assert_eq!(
            array.update(Band::Connection, ValueMap::new(), UpdateOptions::default()),
            Err(ThingError::ReadOnlyBand(Band::Connection))
        );
    }

    #[test]
    fn test_disconnected_thing_leaves_every_collection() {
        let dispatcher = Dispatcher::new();
        let root = ThingArray::persisting(dispatcher.clone());
        let other = ThingArray::new(dispatcher.clone());
        let (thing, _bridge) = bound_lamp(&dispatcher, "lamp-1", AckMode::Auto);
        root.push(thing.clone());
        other.push(thing.clone());
        let view = root.with_model_code("lamp");
        dispatcher.run_until_idle();
        assert_eq!(view.len(), 1);

        root.disconnect();
        dispatcher.run_until_idle();

        assert!(root.is_empty());
        assert!(other.is_empty());
        assert!(view.is_empty());
    }

    #[test]
    fn test_thing_listener_replays_members() {
        let dispatcher = Dispatcher::new();
        let array = ThingArray::new(dispatcher.clone());
        array.push(lamp(&dispatcher));
        array.push(lamp(&dispatcher));
        dispatcher.run_until_idle();

        let things = counter(&array, ArrayEventKind::Thing);
        dispatcher.run_until_idle();
        assert_eq!(*things.lock(), 2);

        array.push(lamp(&dispatcher));
        dispatcher.run_until_idle();
        assert_eq!(*things.lock(), 3);
    }

    #[test]
    fn test_dropped_view_unsubscribes() {
        let dispatcher = Dispatcher::new();
        let source = ThingArray::new(dispatcher.clone());
        let thing = lamp(&dispatcher);
        source.push(thing.clone());
        dispatcher.run_until_idle();

        let view = source.with_name("lamp");
        dispatcher.run_until_idle();
        assert_eq!(source.inner.listeners.len(), 1);
        drop(view);
        assert_eq!(source.inner.listeners.len(), 0);

        assert!(source.any(|t| t.name() == "Lamp"));
        assert_eq!(source.names(), vec!["Lamp".to_string()]);
        assert!(source.first().is_some());
    }
}
