//! Keystore backed by the `[keystore]` table of the configuration

use thing_runtime::Keystore;
use thing_runtime::keystore::pointer;

use crate::config::IotdbConfig;

#[derive(Debug, Clone)]
pub struct ConfigKeystore {
    root: serde_json::Value,
}

impl ConfigKeystore {
    /// Keystore contents with `runner.id` taken from `runner_id` when set
    pub fn from_config(config: &IotdbConfig) -> Self {
        let mut root = match &config.keystore {
            serde_json::Value::Object(_) => config.keystore.clone(),
            _ => serde_json::json!({}),
        };
        if let Some(runner_id) = &config.runner_id {
            if !root["runner"].is_object() {
                root["runner"] = serde_json::json!({});
            }
            root["runner"]["id"] = serde_json::Value::String(runner_id.clone());
        }
        Self { root }
    }
}

impl Keystore for ConfigKeystore {
    fn get(&self, path: &str) -> Option<serde_json::Value> {
        self.root.pointer(&pointer(path)).cloned()
    }
}
