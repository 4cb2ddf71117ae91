//! IOTDB - command line runner for thing models
//!
//! Loads configuration and model files, binds the configured things to
//! in-memory bridges and drives them through `thing_runtime`.

pub mod config;
pub mod keystore;
pub mod loader;
pub mod runner;

pub use config::{ConfigError, IotdbConfig, ThingConfig};
pub use keystore::ConfigKeystore;
pub use loader::{LoadError, ModelLoader};
pub use runner::{Runner, RunnerError, Selector};
