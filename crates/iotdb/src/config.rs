//! Runner Configuration
//!
//! `iotdb.toml`, merged with `IOTDB_`-prefixed environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Invalid(Box::new(e))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IotdbConfig {
    /// Seeds canonical thing ids; overrides `keystore.runner.id`
    #[serde(default)]
    pub runner_id: Option<String>,

    /// Tracing filter used when `RUST_LOG` is unset
    #[serde(default)]
    pub log: Option<String>,

    /// Directory holding `*.model.toml` / `*.model.json` files, relative to the config file
    #[serde(default)]
    pub models_dir: Option<PathBuf>,

    /// Arbitrary nested table exposed through the keystore
    #[serde(default)]
    pub keystore: serde_json::Value,

    #[serde(default)]
    pub things: Vec<ThingConfig>,
}

/// A thing bound to an in-memory bridge at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThingConfig {
    pub model: String,
    pub native_id: String,

    /// Initial metadata reported by the bridge
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,

    /// Initial device state, reported on the first pull
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl IotdbConfig {
    /// Load from a TOML file plus the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let mut config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("IOTDB_"))
            .extract()?;

        if let (Some(dir), Some(base)) = (config.models_dir.as_ref(), path.parent()) {
            if dir.is_relative() {
                config.models_dir = Some(base.join(dir));
            }
        }
        Ok(config)
    }

    /// Parse TOML content without consulting the environment
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(Figment::new().merge(Toml::string(content)).extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = IotdbConfig::from_toml(
            r#"
            runner_id = "home"
            log = "iotdb=debug"
            models_dir = "models"

            [keystore.homestar]
            token = "abc"

            [[things]]
            model = "lamp"
            native_id = "lamp-1"
            meta = { name = "Kitchen Lamp", zone = "Kitchen" }
            values = { on = false, brightness = 40 }
            "#,
        )
        .unwrap();

        assert_eq!(config.runner_id.as_deref(), Some("home"));
        assert_eq!(config.log.as_deref(), Some("iotdb=debug"));
        assert_eq!(config.keystore["homestar"]["token"], "abc");
        assert_eq!(config.things.len(), 1);
        let thing = &config.things[0];
        assert_eq!(thing.native_id, "lamp-1");
        assert_eq!(thing.meta["zone"], "Kitchen");
        assert_eq!(thing.values["brightness"], 40);
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = IotdbConfig::from_toml("").unwrap();
        assert!(config.runner_id.is_none());
        assert!(config.things.is_empty());
        assert!(config.keystore.is_null());
    }

    #[test]
    fn test_missing_file() {
        let result = IotdbConfig::load("/definitely/not/here/iotdb.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_resolves_models_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iotdb.toml");
        std::fs::write(&path, "models_dir = \"models\"\n").unwrap();

        let config = IotdbConfig::load(&path).unwrap();
        assert_eq!(config.models_dir, Some(dir.path().join("models")));
    }

    #[test]
    fn test_invalid_config() {
        let result = IotdbConfig::from_toml("things = 3");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
