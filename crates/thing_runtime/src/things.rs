//! Things Manager
//!
//! Owns the dispatcher, the keystore, the model registry and the root
//! collection. Binding a bridge creates a thing, gives it its canonical id,
//! registers it and pushes it onto the root collection.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use thing_types::ThingModel;

use crate::bridge::{Binding, Bridge, DiscoverOptions, Discovery, EnumRemap};
use crate::collection::{ThingArray, ThingFilter};
use crate::dispatcher::Dispatcher;
use crate::error::{ThingError, ThingResult};
use crate::event::ThingEvent;
use crate::keystore::Keystore;
use crate::thing::Thing;

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Bound things by canonical id
#[derive(Default)]
pub struct ThingRegistry {
    things: DashMap<String, Arc<Thing>>,
}

impl ThingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, thing: Arc<Thing>) {
        self.things.insert(thing.thing_id(), thing);
    }

    pub fn get(&self, thing_id: &str) -> Option<Arc<Thing>> {
        self.things.get(thing_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, thing_id: &str) -> Option<Arc<Thing>> {
        self.things.remove(thing_id).map(|(_, thing)| thing)
    }

    pub fn contains(&self, thing_id: &str) -> bool {
        self.things.contains_key(thing_id)
    }

    pub fn len(&self) -> usize {
        self.things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.things.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

struct ThingsInner {
    dispatcher: Dispatcher,
    keystore: Arc<dyn Keystore>,
    registry: ThingRegistry,
    models: RwLock<HashMap<String, Arc<ThingModel>>>,
    root: ThingArray,
}

/// Entry point for binding bridges and finding things
#[derive(Clone)]
pub struct Things {
    inner: Arc<ThingsInner>,
}

impl Things {
    pub fn new(dispatcher: Dispatcher, keystore: Arc<dyn Keystore>) -> Self {
        let root = ThingArray::persisting(dispatcher.clone());
        Self {
            inner: Arc::new(ThingsInner {
                dispatcher,
                keystore,
                registry: ThingRegistry::new(),
                models: RwLock::new(HashMap::new()),
                root,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn keystore(&self) -> &Arc<dyn Keystore> {
        &self.inner.keystore
    }

    pub fn registry(&self) -> &ThingRegistry {
        &self.inner.registry
    }

    /// Runner id from the keystore (`/runner/id`), `iotdb` if unset
    pub fn runner_id(&self) -> String {
        self.inner
            .keystore
            .get_str("/runner/id")
            .unwrap_or_else(|| "iotdb".to_string())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Models
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_model(&self, model: ThingModel) -> Arc<ThingModel> {
        let model = Arc::new(model);
        let previous = self
            .inner
            .models
            .write()
            .insert(model.model_code().to_string(), model.clone());
        if previous.is_some() {
            warn!("Model {} replaced", model.model_code());
        } else {
            debug!("Model {} registered", model.model_code());
        }
        model
    }

    pub fn model(&self, model_code: &str) -> Option<Arc<ThingModel>> {
        self.inner.models.read().get(model_code).cloned()
    }

    pub fn models(&self) -> Vec<Arc<ThingModel>> {
        let mut models: Vec<_> = self.inner.models.read().values().cloned().collect();
        models.sort_by(|a, b| a.model_code().cmp(b.model_code()));
        models
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Binding
    // ─────────────────────────────────────────────────────────────────────────

    /// Canonical id for a device: a name-based UUID over runner, model and native id
    pub fn canonical_id(&self, model_code: &str, native_id: &str) -> String {
        let name = format!("{}/{}/{}", self.runner_id(), model_code, native_id);
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes());
        format!("urn:iotdb:thing:{}", uuid)
    }

    /// Create (or find) the thing for `bridge` under `model_code`
    ///
    /// Binding the same device twice returns the existing thing.
    pub fn bind(
        &self,
        model_code: &str,
        bridge: Arc<dyn Bridge>,
        remap: EnumRemap,
    ) -> ThingResult<Arc<Thing>> {
        let model = self
            .model(model_code)
            .ok_or_else(|| ThingError::UnknownModel(model_code.to_string()))?;
        let thing_id = self.canonical_id(model_code, &bridge.native_id());
        if let Some(existing) = self.inner.registry.get(&thing_id) {
            debug!(thing_id = %thing_id, "bind: already bound");
            return Ok(existing);
        }

        let thing = Thing::new(model, self.inner.dispatcher.clone());
        thing.bind(thing_id.clone(), Binding::new(bridge).with_remap(remap))?;

        let weak = Arc::downgrade(&self.inner);
        thing.on_event(move |thing, event| {
            if *event == ThingEvent::Disconnected {
                if let Some(inner) = weak.upgrade() {
                    inner.registry.remove(&thing.thing_id());
                }
            }
        });

        self.inner.registry.insert(thing.clone());
        self.inner.root.push(thing.clone());
        info!(thing_id = %thing_id, model = %model_code, "Thing registered");
        Ok(thing)
    }

    /// Run `discovery` for `model_code` and bind every bridge it yields
    ///
    /// Returns a view of all things of that model; it fills as discovery
    /// progresses. Must be called from within a tokio runtime.
    pub fn connect(
        &self,
        model_code: &str,
        discovery: Arc<dyn Discovery>,
        params: serde_json::Value,
    ) -> ThingResult<ThingArray> {
        if self.model(model_code).is_none() {
            return Err(ThingError::UnknownModel(model_code.to_string()));
        }
        let view = self
            .inner
            .root
            .filter(ThingFilter::new().with_model_code(model_code));

        let options = DiscoverOptions {
            model_code: model_code.to_string(),
            params,
        };
        let things = self.clone();
        tokio::spawn(async move {
            let mut bridges = discovery.discover(&options);
            while let Some(bridge) = bridges.next().await {
                let things = things.clone();
                let model_code = options.model_code.clone();
                things.dispatcher().clone().post(move || {
                    if let Err(e) = things.bind(&model_code, bridge, EnumRemap::default()) {
                        warn!("Discovered device could not be bound: {}", e);
                    }
                });
            }
            debug!("Discovery for {} finished", options.model_code);
        });

        Ok(view)
    }

    /// Root collection of every bound thing
    pub fn things(&self) -> ThingArray {
        self.inner.root.clone()
    }

    pub fn get(&self, thing_id: &str) -> Option<Arc<Thing>> {
        self.inner.registry.get(thing_id)
    }

    /// Disconnect every thing
    pub fn disconnect_all(&self) {
        for thing in self.inner.root.things() {
            thing.disconnect();
        }
    }
}

impl std::fmt::Debug for Things {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Things")
            .field("things", &self.inner.registry.len())
            .field("models", &self.inner.models.read().len())
            .finish()
    }
}
