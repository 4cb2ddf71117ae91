//! Keystore
//!
//! Read access to configuration values addressed by slash paths
//! (`/runner/id`). The runtime only reads from it.

use parking_lot::RwLock;

pub trait Keystore: Send + Sync {
    fn get(&self, path: &str) -> Option<serde_json::Value>;

    fn get_or(&self, path: &str, default: serde_json::Value) -> serde_json::Value {
        self.get(path).unwrap_or(default)
    }

    /// String value at `path`, if it is one
    fn get_str(&self, path: &str) -> Option<String> {
        self.get(path)
            .and_then(|v| v.as_str().map(str::to_string))
    }
}

/// Turn `/a/b`, `a/b` or `a.b` into a JSON pointer
pub fn pointer(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    let segments: Vec<&str> = if trimmed.contains('/') {
        trimmed.split('/').collect()
    } else {
        trimmed.split('.').collect()
    };
    segments
        .iter()
        .map(|s| format!("/{}", s.replace('~', "~0")))
        .collect()
}

/// Keystore over an in-memory JSON tree
#[derive(Debug, Default)]
pub struct MemoryKeystore {
    root: RwLock<serde_json::Value>,
}

impl MemoryKeystore {
    pub fn new(root: serde_json::Value) -> Self {
        Self {
            root: RwLock::new(root),
        }
    }

    /// Store `value` at `path`, creating intermediate objects
    pub fn set(&self, path: &str, value: serde_json::Value) {
        let mut root = self.root.write();
        let pointer = pointer(path);
        let mut node = &mut *root;
        for segment in pointer.split('/').skip(1) {
            let segment = segment.replace("~0", "~");
            if !node.is_object() {
                *node = serde_json::Value::Object(Default::default());
            }
            node = &mut node[segment.as_str()];
        }
        *node = value;
    }
}

impl Keystore for MemoryKeystore {
    fn get(&self, path: &str) -> Option<serde_json::Value> {
        self.root.read().pointer(&pointer(path)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pointer_forms() {
        assert_eq!(pointer("/runner/id"), "/runner/id");
        assert_eq!(pointer("runner/id"), "/runner/id");
        assert_eq!(pointer("runner.id"), "/runner/id");
        assert_eq!(pointer("/"), "");
    }

    #[test]
    fn test_get_and_default() {
        let keystore = MemoryKeystore::new(json!({ "runner": { "id": "home" } }));
        assert_eq!(keystore.get_str("/runner/id"), Some("home".to_string()));
        assert_eq!(keystore.get("/runner/missing"), None);
        assert_eq!(keystore.get_or("/runner/missing", json!(3)), json!(3));
    }

    #[test]
    fn test_set_creates_path() {
        let keystore = MemoryKeystore::default();
        keystore.set("/a/b/c", json!(true));
        assert_eq!(keystore.get("a.b.c"), Some(json!(true)));
        assert_eq!(keystore.get("/a/b"), Some(json!({ "c": true })));
    }
}
