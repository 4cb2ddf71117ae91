//! Model Loader
//!
//! Loads thing models from a directory of `*.model.toml` and `*.model.json`
//! files. A file that fails to parse is logged and skipped.

use std::path::Path;

use tokio::fs;
use tracing::{debug, info, warn};

use thing_types::{SchemaError, ThingModel};

/// Error type for model loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Models directory does not exist: {0}")]
    PathNotFound(std::path::PathBuf),

    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid model: {0}")]
    Schema(#[from] SchemaError),
}

/// Model loader
pub struct ModelLoader;

impl ModelLoader {
    /// Load every model file in `dir`, sorted by model code
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<ThingModel>, LoadError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Err(LoadError::PathNotFound(dir.to_path_buf()));
        }

        let mut models = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".model.toml") && !name.ends_with(".model.json") {
                continue;
            }
            match Self::load_file(&path).await {
                Ok(model) => {
                    debug!("Loaded model: {}", model.model_code());
                    models.push(model);
                }
                Err(e) => {
                    warn!("Failed to load model from {}: {}", path.display(), e);
                }
            }
        }

        models.sort_by(|a, b| a.model_code().cmp(b.model_code()));
        info!("Loaded {} models from {}", models.len(), dir.display());
        Ok(models)
    }

    /// Load a single model file
    pub async fn load_file(path: &Path) -> Result<ThingModel, LoadError> {
        let content = fs::read_to_string(path).await?;
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        if is_json {
            let document: serde_json::Value = serde_json::from_str(&content)?;
            Ok(ThingModel::from_document(&document)?)
        } else {
            Ok(ThingModel::from_toml(&content)?)
        }
    }
}
