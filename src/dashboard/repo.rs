//! Typed access to the three documents the dashboard owns: `orders`,
//! `users` and `product_categories`.

use std::collections::BTreeMap;

use packflow_common::{Order, Patch, ProductType};
use serde_json::Value;

use super::views::OrderSet;
use crate::auth::UserRecord;
use crate::errors::{OmsError, OmsResult};
use crate::store::SharedStore;

pub const ORDERS: &str = "orders";
pub const USERS: &str = "users";
pub const CATEGORIES: &str = "product_categories";

/// Product type name -> category names.
pub type Categories = BTreeMap<String, Vec<String>>;

pub fn default_categories() -> Categories {
    let mut defaults = Categories::new();
    defaults.insert(
        ProductType::Box.as_str().to_string(),
        vec!["Rigid Box".into(), "Folding Box".into(), "Mono Cartons".into()],
    );
    defaults.insert(
        ProductType::Bag.as_str().to_string(),
        vec!["Paper Bags".into(), "SOS Envelopes".into()],
    );
    defaults
}

fn string_list(value: &Value) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        // Lists written through push() come back keyed.
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stored categories with the defaults filled in for any product type that
/// is missing or empty.
pub fn merge_categories(raw: Option<&Value>) -> Categories {
    let mut categories = Categories::new();
    if let Some(Value::Object(map)) = raw {
        for (product, list) in map {
            categories.insert(product.clone(), string_list(list));
        }
    }
    for (product, defaults) in default_categories() {
        let entry = categories.entry(product).or_default();
        if entry.is_empty() {
            *entry = defaults;
        }
    }
    categories
}

/// A single path segment for a record key. Keys never contain `/`.
fn record_path(collection: &str, key: &str) -> OmsResult<String> {
    let key = key.trim();
    if key.is_empty() || key.contains('/') {
        return Err(OmsError::Validation(format!("Invalid key '{}'", key)));
    }
    Ok(format!("{}/{}", collection, key))
}

#[derive(Clone)]
pub struct Repository {
    store: SharedStore,
}

impl Repository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    // ── Orders ────────────────────────────────────────────────────────

    pub async fn load_orders(&self) -> OmsResult<OrderSet> {
        let raw = self.store.read(ORDERS).await?;
        let set = OrderSet::from_collection(raw);
        if !set.malformed.is_empty() {
            tracing::warn!(count = set.malformed.len(), "skipping malformed order records");
        }
        Ok(set)
    }

    /// Every `order_id` in the collection, including those on records that
    /// otherwise fail to parse.
    pub async fn order_ids(&self) -> OmsResult<Vec<String>> {
        let Some(Value::Object(records)) = self.store.read(ORDERS).await? else {
            return Ok(Vec::new());
        };
        Ok(records
            .values()
            .filter_map(|record| record.get("order_id"))
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    pub async fn get_order(&self, key: &str) -> OmsResult<Order> {
        let path = record_path(ORDERS, key)?;
        let raw = self
            .store
            .read(&path)
            .await?
            .ok_or_else(|| OmsError::OrderNotFound {
                key: key.to_string(),
            })?;
        Order::from_record(key, raw)
            .map_err(|reason| OmsError::Validation(format!("Order {} is malformed: {}", key, reason)))
    }

    pub async fn insert_order(&self, record: &Value) -> OmsResult<String> {
        Ok(self.store.push(ORDERS, record).await?)
    }

    pub async fn patch_order(&self, key: &str, patch: &Patch) -> OmsResult<()> {
        let path = record_path(ORDERS, key)?;
        self.store.update(&path, patch).await?;
        Ok(())
    }

    pub async fn delete_order(&self, key: &str) -> OmsResult<()> {
        let path = record_path(ORDERS, key)?;
        self.store.delete(&path).await?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub async fn get_user(&self, username: &str) -> OmsResult<Option<UserRecord>> {
        let path = record_path(USERS, username)?;
        let Some(raw) = self.store.read(&path).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<UserRecord>(raw) {
            Ok(mut user) => {
                if user.username.is_empty() {
                    user.username = username.to_string();
                }
                Ok(Some(user))
            }
            Err(e) => {
                tracing::warn!(%username, error = %e, "unreadable user record");
                Ok(None)
            }
        }
    }

    pub async fn list_users(&self) -> OmsResult<Vec<UserRecord>> {
        let Some(Value::Object(records)) = self.store.read(USERS).await? else {
            return Ok(Vec::new());
        };
        let mut users = Vec::new();
        for (username, raw) in records {
            match serde_json::from_value::<UserRecord>(raw) {
                Ok(mut user) => {
                    if user.username.is_empty() {
                        user.username = username;
                    }
                    users.push(user);
                }
                Err(e) => tracing::warn!(%username, error = %e, "unreadable user record"),
            }
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    pub async fn save_user(&self, user: &UserRecord) -> OmsResult<()> {
        let path = record_path(USERS, &user.username)?;
        let value = serde_json::to_value(user).map_err(anyhow::Error::from)?;
        self.store.set(&path, &value).await?;
        Ok(())
    }

    // ── Categories ────────────────────────────────────────────────────

    pub async fn categories(&self) -> OmsResult<Categories> {
        let raw = self.store.read(CATEGORIES).await?;
        Ok(merge_categories(raw.as_ref()))
    }

    /// Adds `name` under `product` unless an equal name (ignoring case)
    /// is already listed. Returns the full updated table.
    pub async fn add_category(&self, product: ProductType, name: &str) -> OmsResult<Categories> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OmsError::Validation("Category name is required".to_string()));
        }
        let mut categories = self.categories().await?;
        let list = categories.entry(product.as_str().to_string()).or_default();
        if !list.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            list.push(name.to_string());
            let value = serde_json::to_value(&categories).map_err(anyhow::Error::from)?;
            self.store.set(CATEGORIES, &value).await?;
        }
        Ok(categories)
    }
}
