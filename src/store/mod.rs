//! Key-path document store.
//!
//! Records live at slash-separated paths (`orders/-Mabc`, `users/alice`).
//! The production backend speaks the `<base-url>/<path>.json` REST contract
//! over HTTP; the in-memory backend implements the same semantics for tests
//! and `serve --memory`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::StoreError;

pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Value at `path`, or `None` when nothing is stored there.
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Append `value` under a generated child key of `path` and return the key.
    async fn push(&self, path: &str, value: &Value) -> Result<String, StoreError>;

    /// Replace the value at `path`.
    async fn set(&self, path: &str, value: &Value) -> Result<(), StoreError>;

    /// Write each entry of `patch` relative to `path`. Keys may themselves be
    /// slash-separated paths; a `null` value deletes that location.
    async fn update(&self, path: &str, patch: &Map<String, Value>) -> Result<(), StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

/// Split a store path into segments, rejecting anything the remote store
/// would refuse or that could escape the intended record.
pub fn path_segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    for segment in &segments {
        let bad = segment.is_empty()
            || *segment == ".."
            || segment
                .chars()
                .any(|c| matches!(c, '.' | '#' | '$' | '[' | ']') || c.is_control());
        if bad {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
    }
    Ok(segments)
}
