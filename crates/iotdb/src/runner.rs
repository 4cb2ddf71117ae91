//! Runner
//!
//! Wires configuration, models and in-memory bridges into a [`Things`]
//! manager, and exposes the few operations the command line needs.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use thing_runtime::{Dispatcher, EnumRemap, MemoryBridge, ThingArray, ThingError, Things};
use thing_types::{ThingModel, Value, ValueMap};

use crate::config::{IotdbConfig, ThingConfig};
use crate::keystore::ConfigKeystore;
use crate::loader::{LoadError, ModelLoader};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Thing(#[from] ThingError),
}

/// Narrows the root collection before a bulk command
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub zone: Option<String>,
    pub name: Option<String>,
    pub model: Option<String>,
}

impl Selector {
    fn apply(&self, things: ThingArray) -> ThingArray {
        let mut view = things;
        if let Some(model) = &self.model {
            view = view.with_model_code(model);
        }
        if let Some(zone) = &self.zone {
            view = view.with_zone(zone);
        }
        if let Some(name) = &self.name {
            view = view.with_name(name);
        }
        view
    }
}

pub struct Runner {
    things: Things,
    bridges: Vec<Arc<MemoryBridge>>,
}

impl Runner {
    /// Load models from `models_dir` and bind the configured things
    pub async fn start(config: &IotdbConfig) -> Result<Self, RunnerError> {
        let models = match &config.models_dir {
            Some(dir) => ModelLoader::load_dir(dir).await?,
            None => Vec::new(),
        };
        Ok(Self::with_models(config, models))
    }

    /// Build a runner from already loaded models
    pub fn with_models(config: &IotdbConfig, models: Vec<ThingModel>) -> Self {
        let keystore = Arc::new(ConfigKeystore::from_config(config));
        let things = Things::new(Dispatcher::new(), keystore);
        for model in models {
            things.add_model(model);
        }

        let mut runner = Self {
            things,
            bridges: Vec::new(),
        };
        for thing in &config.things {
            if let Err(e) = runner.bind(thing) {
                warn!("Skipping thing {}: {}", thing.native_id, e);
            }
        }
        let ran = runner.settle();
        info!(
            "Runner {} started with {} things ({} tasks)",
            runner.things.runner_id(),
            runner.things.registry().len(),
            ran
        );
        runner
    }

    fn bind(&mut self, config: &ThingConfig) -> Result<(), RunnerError> {
        let values: ValueMap = config
            .values
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect();
        let mut bridge = MemoryBridge::new(config.native_id.clone())
            .with_echo(true)
            .with_values(values);
        for (key, value) in &config.meta {
            bridge = bridge.with_meta(key, Value::from(value.clone()));
        }
        let bridge = bridge.into_arc();

        let thing = self
            .things
            .bind(&config.model, bridge.clone(), EnumRemap::default())?;
        thing.pull();
        debug!(thing_id = %thing.thing_id(), native_id = %config.native_id, "Bound configured thing");
        self.bridges.push(bridge);
        Ok(())
    }

    pub fn things(&self) -> &Things {
        &self.things
    }

    /// Bridges created for configured things, in configuration order
    pub fn bridges(&self) -> &[Arc<MemoryBridge>] {
        &self.bridges
    }

    /// Run queued notifications and bridge callbacks until nothing is left
    pub fn settle(&self) -> usize {
        self.things.dispatcher().run_until_idle()
    }

    /// State snapshot of every selected thing
    pub fn list(&self, selector: &Selector) -> serde_json::Value {
        let view = selector.apply(self.things.things());
        let states: Vec<serde_json::Value> =
            view.things().iter().map(|thing| thing.state_json()).collect();
        serde_json::Value::Array(states)
    }

    /// Set `key` on every selected thing and wait for the pushes to settle
    ///
    /// Returns the number of things the command reached.
    pub fn set(&self, selector: &Selector, key: &str, value: Value) -> Result<usize, RunnerError> {
        let view = selector.apply(self.things.things());
        view.set(key, value)?;
        let count = view.len();
        self.settle();
        info!("Set {} on {} things", key, count);
        Ok(count)
    }

    /// Registered models with their attribute schemas
    pub fn models_json(&self) -> serde_json::Value {
        let models: Vec<serde_json::Value> = self
            .things
            .models()
            .iter()
            .map(|model| {
                json!({
                    "model-code": model.model_code(),
                    "name": model.name(),
                    "attributes": model.attributes(),
                })
            })
            .collect();
        serde_json::Value::Array(models)
    }

    pub fn shutdown(&self) {
        self.things.disconnect_all();
        self.settle();
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("things", &self.things)
            .field("bridges", &self.bridges.len())
            .finish()
    }
}
