//! Thing and Collection Events
//!
//! Events are delivered through the dispatcher, never from inside the
//! operation that caused them. Listener lists are snapshotted before
//! delivery so callbacks may subscribe or unsubscribe freely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use thing_types::Value;

use crate::band::Band;
use crate::thing::Thing;

// ─────────────────────────────────────────────────────────────────────────────
// Listener Ids
// ─────────────────────────────────────────────────────────────────────────────

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Handle returned by every `on*` call, passed back to `off`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ordered listener list keyed by [`ListenerId`]
pub(crate) struct Listeners<C> {
    entries: Mutex<Vec<(ListenerId, C)>>,
}

impl<C: Clone> Listeners<C> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, callback: C) -> ListenerId {
        let id = ListenerId::next();
        self.entries.lock().push((id, callback));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub fn snapshot(&self) -> Vec<C> {
        self.entries.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Thing Events
// ─────────────────────────────────────────────────────────────────────────────

/// Something observable happened to a thing
#[derive(Debug, Clone, PartialEq)]
pub enum ThingEvent {
    /// One attribute of the input or output band changed; `None` means cleared
    Attribute {
        band: Band,
        code: String,
        value: Option<Value>,
    },

    /// A band changed; delivered once per update, after its attribute events
    Band { band: Band, changed: Vec<String> },

    /// Transient tags were added or removed
    Tags,

    /// The thing was unbound from its bridge
    Disconnected,
}

impl ThingEvent {
    /// Whether this event can change the outcome of a metadata filter
    pub fn affects_filters(&self) -> bool {
        matches!(
            self,
            ThingEvent::Tags
                | ThingEvent::Band {
                    band: Band::Meta,
                    ..
                }
        )
    }
}

/// Callback for input-band changes of one attribute: `(thing, code, value)`
pub type AttributeCallback = Arc<dyn Fn(&Arc<Thing>, &str, &Value) + Send + Sync>;

/// Callback for every event of a thing
pub type ThingCallback = Arc<dyn Fn(&Arc<Thing>, &ThingEvent) + Send + Sync>;

/// What a thing listener is interested in
#[derive(Clone)]
pub(crate) enum Subscription {
    Attribute {
        code: String,
        callback: AttributeCallback,
    },
    Band {
        band: Band,
        callback: ThingCallback,
    },
    All(ThingCallback),
}

impl Subscription {
    pub fn deliver(&self, thing: &Arc<Thing>, event: &ThingEvent) {
        match (self, event) {
            (
                Subscription::Attribute { code, callback },
                ThingEvent::Attribute {
                    band: Band::Input,
                    code: changed,
                    value: Some(value),
                },
            ) if code == changed => callback(thing, changed, value),
            (Subscription::Band { band, callback }, ThingEvent::Band { band: changed, .. })
                if band == changed =>
            {
                callback(thing, event)
            }
            (Subscription::All(callback), _) => callback(thing, event),
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collection Events
// ─────────────────────────────────────────────────────────────────────────────

/// Event kinds a collection listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayEventKind {
    /// Every member, current ones replayed on subscription
    Thing,
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone)]
pub enum ArrayEvent {
    Thing(Arc<Thing>),
    Added(Arc<Thing>),
    Removed(Arc<Thing>),
    Changed,
}

impl ArrayEvent {
    pub fn kind(&self) -> ArrayEventKind {
        match self {
            ArrayEvent::Thing(_) => ArrayEventKind::Thing,
            ArrayEvent::Added(_) => ArrayEventKind::Added,
            ArrayEvent::Removed(_) => ArrayEventKind::Removed,
            ArrayEvent::Changed => ArrayEventKind::Changed,
        }
    }

    pub fn thing(&self) -> Option<&Arc<Thing>> {
        match self {
            ArrayEvent::Thing(t) | ArrayEvent::Added(t) | ArrayEvent::Removed(t) => Some(t),
            ArrayEvent::Changed => None,
        }
    }
}

pub type ArrayCallback = Arc<dyn Fn(&ArrayEvent) + Send + Sync>;
