use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{DocumentStore, path_segments};
use crate::errors::StoreError;

/// In-process document tree with the same write semantics as the remote
/// store: parents are created on write and pruned when emptied.
pub struct MemoryStore {
    root: RwLock<Value>,
    next_key: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            next_key: AtomicU64::new(1),
        }
    }

    /// Seed the tree, e.g. with a fixture export.
    pub fn with_data(data: Value) -> Self {
        let root = if data.is_object() {
            data
        } else {
            Value::Object(Map::new())
        };
        Self {
            root: RwLock::new(root),
            next_key: AtomicU64::new(1),
        }
    }

    /// Whole tree, for assertions.
    pub async fn snapshot(&self) -> Value {
        self.root.read().await.clone()
    }

    fn generate_key(&self) -> String {
        let n = self.next_key.fetch_add(1, Ordering::SeqCst);
        format!("-P{:012}", n)
    }
}

fn get<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(*segment))
}

fn put(root: &mut Value, segments: &[&str], value: Value) {
    let mut node = root;
    for segment in segments {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map.entry(segment.to_string()).or_insert(Value::Null);
    }
    *node = value;
}

/// Remove the value at `segments`; returns true when the parent became
/// empty and should itself be removed.
fn remove(node: &mut Value, segments: &[&str]) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    match segments {
        [] => false,
        [last] => {
            map.remove(*last);
            map.is_empty()
        }
        [first, rest @ ..] => {
            let prune = match map.get_mut(*first) {
                Some(child) => remove(child, rest),
                None => false,
            };
            if prune {
                map.remove(*first);
            }
            map.is_empty()
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segments = path_segments(path)?;
        let root = self.root.read().await;
        Ok(get(&root, &segments).filter(|v| !v.is_null()).cloned())
    }

    async fn push(&self, path: &str, value: &Value) -> Result<String, StoreError> {
        let mut segments = path_segments(path)?;
        let key = self.generate_key();
        segments.push(&key);
        let mut root = self.root.write().await;
        put(&mut root, &segments, value.clone());
        Ok(key)
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        let segments = path_segments(path)?;
        let mut root = self.root.write().await;
        if value.is_null() {
            remove(&mut root, &segments);
        } else {
            put(&mut root, &segments, value.clone());
        }
        Ok(())
    }

    async fn update(&self, path: &str, patch: &Map<String, Value>) -> Result<(), StoreError> {
        let base = path_segments(path)?;
        // Validate every key before touching the tree.
        let mut writes = Vec::with_capacity(patch.len());
        for (key, value) in patch {
            let mut full = base.clone();
            full.extend(path_segments(key)?);
            writes.push((full, value));
        }
        let mut root = self.root.write().await;
        for (segments, value) in writes {
            if value.is_null() {
                remove(&mut root, &segments);
            } else {
                put(&mut root, &segments, value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let segments = path_segments(path)?;
        let mut root = self.root.write().await;
        remove(&mut root, &segments);
        Ok(())
    }
}
