//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `orders`  | `Orders`         |
//! | `users`   | `Users`          |
//! | `config`  | `Config`         |

pub mod config;
pub mod orders;
pub mod serve;
pub mod users;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use packflow::config::PackflowToml;
use packflow::store::{HttpStore, MemoryStore, SharedStore};

pub use config::cmd_config;
pub use orders::cmd_orders;
pub use serve::cmd_serve;
pub use users::cmd_users;

/// The configured remote store, or an empty in-memory one.
pub(crate) fn open_store(settings: &PackflowToml, memory: bool) -> Result<SharedStore> {
    if memory {
        tracing::warn!("using in-memory store; nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let base_url = settings.store.base_url.as_deref().context(
        "No store configured. Set store.base_url in packflow.toml or PACKFLOW_STORE_URL",
    )?;
    let store = HttpStore::new(
        base_url,
        settings.store.auth.clone(),
        Duration::from_secs(settings.store.timeout_secs),
    )
    .context("Failed to create store client")?;
    Ok(Arc::new(store))
}
