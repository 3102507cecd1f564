//! Configuration for packflow, read from `.packflow/packflow.toml`.
//!
//! Layering is file → environment → CLI flags. A missing file means
//! defaults; the environment can then fill in the store URL, store secret,
//! port and default-admin password without touching the file.
//!
//! ```toml
//! [server]
//! port = 8501
//! host = "127.0.0.1"
//! max_upload_bytes = 10485760
//!
//! [store]
//! base_url = "https://example-default-rtdb.firebaseio.com"
//! timeout_secs = 30
//!
//! [auth]
//! default_admin = "admin"
//! session_ttl_hours = 12
//!
//! [orders]
//! id_prefix = "SRP"
//! tracking_base_url = "https://srppackaging.com/tracking.html"
//! utc_offset_minutes = 330
//!
//! [deadlines]
//! packing_hours = 36
//! dispatch_hours = 48
//!
//! [company]
//! name = "SRP Packaging"
//!
//! [logging]
//! json = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::FixedOffset;
use packflow_common::lifecycle::Deadlines;
use packflow_common::{ids, timefmt};
use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = ".packflow";
pub const CONFIG_FILE: &str = "packflow.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    pub host: String,
    /// Permissive CORS and bind on all interfaces, for a separately served UI.
    pub dev_mode: bool,
    pub max_upload_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 8501,
            host: "127.0.0.1".to_string(),
            dev_mode: false,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Root URL of the document store; `<base_url>/<path>.json` is fetched.
    pub base_url: Option<String>,
    /// Secret sent as the `auth` query parameter.
    pub auth: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            base_url: None,
            auth: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub default_admin: String,
    /// Without a password the built-in admin cannot log in.
    pub default_admin_password: Option<String>,
    pub session_ttl_hours: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            default_admin: "admin".to_string(),
            default_admin_password: None,
            session_ttl_hours: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersSection {
    pub id_prefix: String,
    pub tracking_base_url: String,
    pub utc_offset_minutes: i32,
}

impl Default for OrdersSection {
    fn default() -> Self {
        Self {
            id_prefix: ids::DEFAULT_PREFIX.to_string(),
            tracking_base_url: "https://srppackaging.com/tracking.html".to_string(),
            utc_offset_minutes: timefmt::DEFAULT_OFFSET_MINUTES,
        }
    }
}

/// Letterhead printed on order sheets and slips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanySection {
    pub name: String,
    pub tagline: String,
    pub phone: String,
    pub gstin: String,
    pub website: String,
}

impl Default for CompanySection {
    fn default() -> Self {
        Self {
            name: "SRP Packaging".to_string(),
            tagline: "Boxes, bags and printed packaging".to_string(),
            phone: String::new(),
            gstin: String::new(),
            website: "https://srppackaging.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// When set, logs are also written to daily files in this directory.
    pub dir: Option<PathBuf>,
    pub json: bool,
}

/// Root of `packflow.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackflowToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub orders: OrdersSection,
    #[serde(default)]
    pub deadlines: Deadlines,
    #[serde(default)]
    pub company: CompanySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl PackflowToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse packflow.toml")
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            toml::to_string_pretty(self).context("Failed to serialize packflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `PACKFLOW_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get("PACKFLOW_STORE_URL") {
            self.store.base_url = Some(url);
        }
        if let Some(secret) = get("PACKFLOW_STORE_AUTH") {
            self.store.auth = Some(secret);
        }
        if let Some(port) = get("PACKFLOW_PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(password) = get("PACKFLOW_ADMIN_PASSWORD") {
            self.auth.default_admin_password = Some(password);
        }
        if let Some(json) = get("PACKFLOW_LOG_JSON") {
            self.logging.json = matches!(json.as_str(), "1" | "true" | "TRUE" | "yes" | "YES");
        }
        self
    }

    pub fn display_offset(&self) -> FixedOffset {
        timefmt::offset(self.orders.utc_offset_minutes)
    }

    /// Problems worth reporting before the server starts.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        match &self.store.base_url {
            None => warnings.push(
                "store.base_url is not set; only `serve --memory` will work".to_string(),
            ),
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                warnings.push(format!("store.base_url '{}' is not an http(s) URL", url))
            }
            Some(_) => {}
        }
        if self.auth.default_admin_password.is_none() {
            warnings.push(format!(
                "auth.default_admin_password is not set; '{}' can only log in if stored in users/",
                self.auth.default_admin
            ));
        }
        if self.orders.id_prefix.trim().is_empty() {
            warnings.push("orders.id_prefix is empty".to_string());
        }
        if !(-720..=840).contains(&self.orders.utc_offset_minutes) {
            warnings.push(format!(
                "orders.utc_offset_minutes {} is outside -720..=840",
                self.orders.utc_offset_minutes
            ));
        }
        if self.auth.session_ttl_hours <= 0 {
            warnings.push("auth.session_ttl_hours must be positive".to_string());
        }
        warnings
    }
}

/// `<project_dir>/.packflow/packflow.toml`
pub fn default_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
}
