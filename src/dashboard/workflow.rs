//! Every operation a dashboard user can perform, with authorization.
//!
//! Each mutation reads the order, asks [`packflow_common::lifecycle`] for a
//! plan, writes the resulting patch and re-reads the record so callers
//! (HTTP handlers, CLI) get the stored state back. Order-id allocation is
//! the only step serialised inside the process.

use chrono::{DateTime, FixedOffset};
use packflow_common::lifecycle::{self, Requirement};
use packflow_common::{Order, Patch, Priority, ProductType, Stage, ids, timefmt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::repo::{Categories, Repository};
use super::views::{self, DepartmentView, MalformedRecord, OrderFilter, OrderSummary, StageGroup};
use crate::analytics::{self, Analytics};
use crate::auth::{self, Action, DefaultAdmin, Role, Session, UserRecord};
use crate::config::PackflowToml;
use crate::contact;
use crate::errors::{OmsError, OmsResult};
use crate::files::{self, Download};
use crate::qr;
use crate::slip;
use crate::store::SharedStore;

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub username: String,
    pub name: String,
    pub role: Role,
}

impl Actor {
    /// An admin identity for local tooling.
    pub fn system(name: &str) -> Self {
        Self {
            username: name.to_string(),
            name: name.to_string(),
            role: Role::Admin,
        }
    }
}

impl From<&Session> for Actor {
    fn from(session: &Session) -> Self {
        Self {
            username: session.username.clone(),
            name: session.name.clone(),
            role: session.role,
        }
    }
}

// ── Request and response types ────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewOrder {
    pub customer: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub item: String,
    pub qty: Option<u64>,
    pub rate: Option<f64>,
    pub priority: Option<String>,
    pub product_type: Option<String>,
    pub category: String,
    pub received: Option<String>,
    pub due: Option<String>,
    pub advance: bool,
    pub board_thickness_id: String,
    pub paper_thickness_id: String,
    pub size_id: String,
    pub foil_id: String,
    pub spotuv_id: String,
    pub admin_notes: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub role: String,
    #[serde(default)]
    pub name: Option<String>,
    pub password: String,
}

/// A user as shown to admins; never carries credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserView {
    pub username: String,
    pub role: Role,
    pub name: String,
}

impl From<&UserRecord> for UserView {
    fn from(user: &UserRecord) -> Self {
        Self {
            username: user.username.clone(),
            role: user.role,
            name: user.display_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Board {
    pub stages: Vec<StageGroup>,
    pub malformed: Vec<MalformedRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readiness {
    pub stage: Stage,
    pub next_stage: Option<Stage>,
    pub ready: bool,
    pub missing: Vec<Requirement>,
}

#[derive(Debug, Clone)]
pub struct Advanced {
    pub order: Order,
    pub from: Stage,
    pub to: Stage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerSummary {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub orders: usize,
}

/// The fields worth copying into a repeat order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepeatOrder {
    pub key: String,
    pub order_id: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub item: String,
    pub product_type: ProductType,
    pub category: String,
    pub qty: u64,
    pub rate: f64,
    pub priority: Priority,
    pub board_thickness_id: String,
    pub paper_thickness_id: String,
    pub size_id: String,
    pub foil_id: String,
    pub spotuv_id: String,
}

impl From<&Order> for RepeatOrder {
    fn from(order: &Order) -> Self {
        Self {
            key: order.key.clone(),
            order_id: order.order_id.clone(),
            customer_phone: order.customer_phone.clone(),
            customer_email: order.customer_email.clone(),
            item: order.item.clone(),
            product_type: order.product_type,
            category: order.category.clone(),
            qty: order.qty,
            rate: order.rate,
            priority: order.priority,
            board_thickness_id: order.board_thickness_id.clone(),
            paper_thickness_id: order.paper_thickness_id.clone(),
            size_id: order.size_id.clone(),
            foil_id: order.foil_id.clone(),
            spotuv_id: order.spotuv_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareLinks {
    pub order_id: String,
    pub tracking_url: String,
    pub message: String,
    pub whatsapp_url: Option<String>,
}

fn required(value: &str, field: &str) -> OmsResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(OmsError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

pub fn parse_stage(raw: &str) -> OmsResult<Stage> {
    raw.parse().map_err(OmsError::Validation)
}

// ── Workflow ──────────────────────────────────────────────────────────

pub struct Workflow {
    repo: Repository,
    settings: PackflowToml,
    create_lock: Mutex<()>,
}

impl Workflow {
    pub fn new(store: SharedStore, settings: PackflowToml) -> Self {
        Self {
            repo: Repository::new(store),
            settings,
            create_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &PackflowToml {
        &self.settings
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn offset(&self) -> FixedOffset {
        self.settings.display_offset()
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        timefmt::now_in(self.offset())
    }

    fn parse_time(&self, raw: &str, field: &str) -> OmsResult<String> {
        timefmt::parse_timestamp(raw, self.offset())
            .map(timefmt::format_timestamp)
            .ok_or_else(|| OmsError::Validation(format!("{} is not a valid date: {}", field, raw)))
    }

    async fn apply(&self, key: &str, patch: &Patch) -> OmsResult<Order> {
        self.repo.patch_order(key, patch).await?;
        self.repo.get_order(key).await
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub async fn order(&self, key: &str) -> OmsResult<Order> {
        self.repo.get_order(key).await
    }

    /// Matching orders, newest first.
    pub async fn list_orders(&self, filter: &OrderFilter) -> OmsResult<Vec<OrderSummary>> {
        let set = self.repo.load_orders().await?;
        let mut hits = filter.apply(&set.orders);
        hits.sort_by(|a, b| b.key.cmp(&a.key));
        Ok(hits.into_iter().map(OrderSummary::from).collect())
    }

    pub async fn board(&self) -> OmsResult<Board> {
        let set = self.repo.load_orders().await?;
        Ok(Board {
            stages: views::partition_by_stage(&set.orders),
            malformed: set.malformed,
        })
    }

    pub async fn department(&self, stage: Stage, filter: &OrderFilter) -> OmsResult<DepartmentView> {
        if stage.is_terminal() {
            return Err(OmsError::Validation(format!("{} has no department queue", stage)));
        }
        let set = self.repo.load_orders().await?;
        let orders: Vec<Order> = filter.apply(&set.orders).into_iter().cloned().collect();
        Ok(views::department_view(
            &orders,
            stage,
            self.now(),
            self.offset(),
            &self.settings.deadlines,
        ))
    }

    pub async fn readiness(&self, key: &str) -> OmsResult<Readiness> {
        let order = self.repo.get_order(key).await?;
        let missing = lifecycle::readiness(&order);
        Ok(Readiness {
            stage: order.stage,
            next_stage: order.product_type.next_stage(order.stage),
            ready: missing.is_empty() && !order.stage.is_terminal(),
            missing,
        })
    }

    pub async fn customers(&self) -> OmsResult<Vec<CustomerSummary>> {
        let set = self.repo.load_orders().await?;
        let mut orders: Vec<&Order> = set.orders.iter().collect();
        // Oldest first so the latest contact details win.
        orders.sort_by(|a, b| a.key.cmp(&b.key));
        let mut customers: Vec<CustomerSummary> = Vec::new();
        for order in orders {
            let name = order.customer.trim();
            if name.is_empty() {
                continue;
            }
            let idx = match customers.iter().position(|c| c.name.eq_ignore_ascii_case(name)) {
                Some(idx) => idx,
                None => {
                    customers.push(CustomerSummary {
                        name: name.to_string(),
                        phone: String::new(),
                        email: String::new(),
                        orders: 0,
                    });
                    customers.len() - 1
                }
            };
            let entry = &mut customers[idx];
            entry.orders += 1;
            if !order.customer_phone.is_empty() {
                entry.phone = order.customer_phone.clone();
            }
            if !order.customer_email.is_empty() {
                entry.email = order.customer_email.clone();
            }
        }
        customers.sort_by_key(|c| c.name.to_lowercase());
        Ok(customers)
    }

    /// A customer's earlier orders, newest first.
    pub async fn previous_orders(&self, customer: &str) -> OmsResult<Vec<RepeatOrder>> {
        let set = self.repo.load_orders().await?;
        let mut matches: Vec<&Order> = set
            .orders
            .iter()
            .filter(|o| o.customer.trim().eq_ignore_ascii_case(customer.trim()))
            .collect();
        matches.sort_by(|a, b| b.key.cmp(&a.key));
        Ok(matches.into_iter().map(RepeatOrder::from).collect())
    }

    pub async fn categories(&self) -> OmsResult<Categories> {
        self.repo.categories().await
    }

    /// The stored tracking link, or one built from settings for records
    /// created without it.
    fn tracking_url_for(&self, order: &Order) -> String {
        if order.tracking_url.is_empty() {
            contact::tracking_url(&self.settings.orders.tracking_base_url, &order.order_id)
        } else {
            order.tracking_url.clone()
        }
    }

    pub async fn share(&self, key: &str) -> OmsResult<ShareLinks> {
        let order = self.repo.get_order(key).await?;
        let tracking_url = self.tracking_url_for(&order);
        let company = &self.settings.company.name;
        Ok(ShareLinks {
            message: contact::confirmation_message(
                &order.customer,
                &order.order_id,
                &tracking_url,
                company,
            ),
            whatsapp_url: contact::whatsapp_link(
                &order.customer_phone,
                &order.order_id,
                &order.customer,
                &tracking_url,
                company,
            ),
            order_id: order.order_id,
            tracking_url,
        })
    }

    pub async fn download_file(&self, key: &str, slot_name: &str) -> OmsResult<Download> {
        let slot = lifecycle::file_slot(slot_name).ok_or_else(|| {
            lifecycle::LifecycleError::UnknownFileSlot {
                slot: slot_name.to_string(),
            }
        })?;
        let order = self.repo.get_order(key).await?;
        let entry = order.file_at(slot.path).ok_or_else(|| OmsError::FileMissing {
            order_id: order.order_id.clone(),
            label: slot.label.to_string(),
        })?;
        files::download(&entry, &format!("{}_{}", order.order_id, slot.name))
    }

    pub async fn order_sheet(&self, key: &str) -> OmsResult<(Order, Vec<u8>)> {
        let mut order = self.repo.get_order(key).await?;
        order.tracking_url = self.tracking_url_for(&order);
        let pdf = slip::order_sheet(&order, &self.settings.company, self.offset())?;
        Ok((order, pdf))
    }

    /// PNG QR code of the order's tracking link.
    pub async fn tracking_qr(&self, key: &str) -> OmsResult<(Order, Vec<u8>)> {
        let order = self.repo.get_order(key).await?;
        let png = qr::png(&self.tracking_url_for(&order), qr::PNG_SIZE)?;
        Ok((order, png))
    }

    pub async fn stage_slip(&self, actor: &Actor, key: &str, stage: Stage) -> OmsResult<(Order, Vec<u8>)> {
        auth::authorize_stage(actor.role, stage)?;
        let order = self.repo.get_order(key).await?;
        let pdf = slip::stage_slip(&order, stage, &actor.name, self.now(), &self.settings.company)?;
        Ok((order, pdf))
    }

    pub async fn analytics(&self, actor: &Actor) -> OmsResult<Analytics> {
        auth::authorize(actor.role, Action::ViewAnalytics)?;
        let set = self.repo.load_orders().await?;
        Ok(analytics::compute(&set.orders, self.offset()))
    }

    pub async fn export_csv(&self, actor: &Actor, filter: &OrderFilter) -> OmsResult<String> {
        auth::authorize(actor.role, Action::ExportCsv)?;
        let set = self.repo.load_orders().await?;
        let mut hits = filter.apply(&set.orders);
        hits.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(analytics::export_csv(&hits))
    }

    // ── Mutations ─────────────────────────────────────────────────────

    pub async fn create_order(&self, actor: &Actor, req: NewOrder) -> OmsResult<Order> {
        auth::authorize(actor.role, Action::CreateOrder)?;
        let customer = required(&req.customer, "Customer name")?;
        let customer_phone = required(&req.customer_phone, "Customer phone")?;
        let category = required(&req.category, "Category")?;

        let product_type = match req.product_type.as_deref().map(str::trim) {
            None | Some("") => ProductType::Box,
            Some(raw) => raw.parse().map_err(OmsError::Validation)?,
        };
        let priority = match req.priority.as_deref().map(str::trim) {
            None | Some("") => Priority::Medium,
            Some(raw) => raw.parse().map_err(OmsError::Validation)?,
        };
        let qty = req.qty.unwrap_or(1);
        if qty == 0 {
            return Err(OmsError::Validation("Quantity must be at least 1".to_string()));
        }
        let rate = req.rate.unwrap_or(0.0);
        if !rate.is_finite() || rate < 0.0 {
            return Err(OmsError::Validation("Rate must be zero or more".to_string()));
        }

        let categories = self.repo.categories().await?;
        let known = categories
            .get(product_type.as_str())
            .and_then(|list| list.iter().find(|c| c.eq_ignore_ascii_case(&category)))
            .cloned()
            .ok_or_else(|| {
                OmsError::Validation(format!("Unknown {} category '{}'", product_type, category))
            })?;

        let received = match req.received.as_deref().map(str::trim) {
            None | Some("") => timefmt::format_timestamp(self.now()),
            Some(raw) => self.parse_time(raw, "Received date")?,
        };
        let due = match req.due.as_deref().map(str::trim) {
            None | Some("") => String::new(),
            Some(raw) => self.parse_time(raw, "Due date")?,
        };

        let _guard = self.create_lock.lock().await;
        let existing = self.repo.order_ids().await?;
        let order_id = ids::next_order_id(
            existing.iter().map(String::as_str),
            &self.settings.orders.id_prefix,
        );
        let mut order = Order {
            key: String::new(),
            tracking_url: contact::tracking_url(&self.settings.orders.tracking_base_url, &order_id),
            order_id,
            customer,
            customer_phone,
            customer_email: req.customer_email.trim().to_string(),
            item: req.item.trim().to_string(),
            qty,
            rate,
            priority,
            product_type,
            category: known,
            received,
            due,
            advance: if req.advance { "Yes" } else { "No" }.to_string(),
            board_thickness_id: req.board_thickness_id,
            paper_thickness_id: req.paper_thickness_id,
            size_id: req.size_id,
            foil_id: req.foil_id,
            spotuv_id: req.spotuv_id,
            stage: Stage::Design,
            admin_notes: req.admin_notes,
            fields: Map::new(),
        };
        order.key = self.repo.insert_order(&order.to_record()).await?;
        tracing::info!(key = %order.key, order_id = %order.order_id, by = %actor.username, "order created");
        Ok(order)
    }

    /// Removes the record. Malformed records can be deleted too, in which
    /// case no parsed order is returned.
    pub async fn delete_order(&self, actor: &Actor, key: &str) -> OmsResult<Option<Order>> {
        auth::authorize(actor.role, Action::DeleteOrder)?;
        let existing = match self.repo.get_order(key).await {
            Ok(order) => Some(order),
            Err(OmsError::Validation(reason)) => {
                tracing::warn!(%key, %reason, "deleting malformed order record");
                None
            }
            Err(e) => return Err(e),
        };
        self.repo.delete_order(key).await?;
        tracing::info!(%key, by = %actor.username, "order deleted");
        Ok(existing)
    }

    pub async fn start_timer(&self, actor: &Actor, key: &str, stage: Stage) -> OmsResult<Order> {
        auth::authorize_stage(actor.role, stage)?;
        let order = self.repo.get_order(key).await?;
        let patch = lifecycle::plan_timer_start(&order, stage, self.now(), &actor.name)?;
        tracing::debug!(%key, %stage, "timer started");
        self.apply(key, &patch).await
    }

    pub async fn stop_timer(&self, actor: &Actor, key: &str, stage: Stage) -> OmsResult<Order> {
        auth::authorize_stage(actor.role, stage)?;
        let order = self.repo.get_order(key).await?;
        let patch = lifecycle::plan_timer_stop(&order, stage, self.now(), &actor.name)?;
        tracing::debug!(%key, %stage, "timer stopped");
        self.apply(key, &patch).await
    }

    pub async fn update_details(
        &self,
        actor: &Actor,
        key: &str,
        stage: Stage,
        updates: &Map<String, Value>,
    ) -> OmsResult<Order> {
        auth::authorize_stage(actor.role, stage)?;
        if updates.is_empty() {
            return Err(OmsError::Validation("No fields to update".to_string()));
        }
        let order = self.repo.get_order(key).await?;
        let patch = lifecycle::plan_detail_update(&order, stage, updates)?;
        self.apply(key, &patch).await
    }

    pub async fn set_admin_notes(&self, actor: &Actor, key: &str, notes: &str) -> OmsResult<Order> {
        auth::authorize(actor.role, Action::EditAdminNotes)?;
        self.repo.get_order(key).await?;
        let mut patch = Patch::new();
        patch.insert("admin_notes".into(), Value::from(notes.trim()));
        self.apply(key, &patch).await
    }

    /// Stores `bytes` in the slot, replacing any earlier upload.
    pub async fn upload_file(
        &self,
        actor: &Actor,
        key: &str,
        slot_name: &str,
        bytes: &[u8],
        filename: &str,
    ) -> OmsResult<Order> {
        let slot = lifecycle::file_slot(slot_name).ok_or_else(|| {
            lifecycle::LifecycleError::UnknownFileSlot {
                slot: slot_name.to_string(),
            }
        })?;
        auth::authorize_stage(actor.role, slot.stage)?;
        let order = self.repo.get_order(key).await?;
        let entry = files::new_entry(
            bytes,
            filename,
            &actor.name,
            self.now(),
            self.settings.server.max_upload_bytes,
        )?;
        let value = serde_json::to_value(entry).map_err(anyhow::Error::from)?;
        let (patch, slot) = lifecycle::plan_file_upload(&order, slot_name, value)?;
        tracing::info!(%key, slot = slot.name, size = bytes.len(), "file uploaded");
        self.apply(key, &patch).await
    }

    pub async fn advance(
        &self,
        actor: &Actor,
        key: &str,
        expected_stage: Option<Stage>,
    ) -> OmsResult<Advanced> {
        let order = self.repo.get_order(key).await?;
        if !order.stage.is_terminal() {
            auth::authorize_stage(actor.role, order.stage)?;
        }
        let plan = lifecycle::plan_advance(&order, self.now(), &actor.name, expected_stage)?;
        let updated = self.apply(key, &plan.patch).await?;
        tracing::info!(%key, order_id = %updated.order_id, from = %plan.from, to = %plan.to, "order advanced");
        Ok(Advanced {
            order: updated,
            from: plan.from,
            to: plan.to,
        })
    }

    pub async fn override_stage(&self, actor: &Actor, key: &str, target: Stage) -> OmsResult<Advanced> {
        auth::authorize(actor.role, Action::OverrideStage)?;
        let order = self.repo.get_order(key).await?;
        let patch = lifecycle::plan_stage_override(&order, target)?;
        let updated = self.apply(key, &patch).await?;
        tracing::warn!(%key, from = %order.stage, to = %target, by = %actor.username, "stage overridden");
        Ok(Advanced {
            order: updated,
            from: order.stage,
            to: target,
        })
    }

    pub async fn add_category(&self, actor: &Actor, product_type: &str, name: &str) -> OmsResult<Categories> {
        auth::authorize(actor.role, Action::ManageCategories)?;
        let product: ProductType = product_type.parse().map_err(OmsError::Validation)?;
        self.repo.add_category(product, name).await
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub async fn login(&self, username: &str, password: &str) -> OmsResult<UserRecord> {
        let username = username.trim();
        // Names the store cannot key on can never match a user record.
        let unkeyable = username
            .chars()
            .any(|c| matches!(c, '/' | '.' | '#' | '$' | '[' | ']') || c.is_control());
        if username.is_empty() || unkeyable {
            return Err(OmsError::Unauthorized);
        }
        let stored = self.repo.get_user(username).await?;
        let default_admin = DefaultAdmin {
            username: self.settings.auth.default_admin.clone(),
            password: self.settings.auth.default_admin_password.clone(),
        };
        let result = auth::check_login(stored, &default_admin, username, password);
        match &result {
            Ok(user) => tracing::info!(%username, role = %user.role, "login"),
            Err(_) => tracing::warn!(%username, "failed login"),
        }
        result
    }

    pub async fn list_users(&self, actor: &Actor) -> OmsResult<Vec<UserView>> {
        auth::authorize(actor.role, Action::ManageUsers)?;
        let users = self.repo.list_users().await?;
        Ok(users.iter().map(UserView::from).collect())
    }

    /// Creates the user or replaces the existing record of that name.
    pub async fn save_user(&self, actor: &Actor, req: NewUser) -> OmsResult<UserView> {
        auth::authorize(actor.role, Action::ManageUsers)?;
        let username = required(&req.username, "Username")?;
        if req.password.is_empty() {
            return Err(OmsError::Validation("Password is required".to_string()));
        }
        let role: Role = req.role.parse().map_err(OmsError::Validation)?;
        let name = req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let user = UserRecord::new(&username, role, name, &req.password);
        self.repo.save_user(&user).await?;
        tracing::info!(%username, %role, by = %actor.username, "user saved");
        Ok(UserView::from(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use packflow_common::LifecycleError;
    use serde_json::json;
    use std::sync::Arc;

    fn workflow_with(data: Value) -> Workflow {
        let mut settings = PackflowToml::default();
        settings.server.max_upload_bytes = 64;
        Workflow::new(Arc::new(MemoryStore::with_data(data)), settings)
    }

    fn admin() -> Actor {
        Actor::system("admin")
    }

    fn staff(role: Role) -> Actor {
        Actor {
            username: role.as_str().to_string(),
            name: format!("{} staff", role),
            role,
        }
    }

    fn new_order(product: &str, category: &str) -> NewOrder {
        NewOrder {
            customer: "ABC Traders".into(),
            customer_phone: "98765 43210".into(),
            item: "Printed box".into(),
            qty: Some(100),
            rate: Some(4.5),
            product_type: Some(product.into()),
            category: category.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_order_assigns_fresh_id() {
        let wf = workflow_with(json!({"orders": {
            "-old": {"order_id": "SRP009", "stage": "Storage"}
        }}));
        let order = wf.create_order(&admin(), new_order("Box", "rigid box")).await.unwrap();
        assert_eq!(order.order_id, "SRP010");
        assert_eq!(order.stage, Stage::Design);
        assert_eq!(order.category, "Rigid Box");
        assert_eq!(
            order.tracking_url,
            "https://srppackaging.com/tracking.html?id=SRP010"
        );
        let stored = wf.order(&order.key).await.unwrap();
        assert_eq!(stored.order_id, "SRP010");
        assert_eq!(stored.advance, "No");

        let second = wf.create_order(&admin(), new_order("Bag", "Paper Bags")).await.unwrap();
        assert_eq!(second.order_id, "SRP011");
    }

    #[tokio::test]
    async fn test_create_order_validation() {
        let wf = workflow_with(json!({}));
        let mut missing_phone = new_order("Box", "Rigid Box");
        missing_phone.customer_phone = " ".into();
        assert!(matches!(
            wf.create_order(&admin(), missing_phone).await,
            Err(OmsError::Validation(msg)) if msg.contains("phone")
        ));
        assert!(matches!(
            wf.create_order(&admin(), new_order("Bag", "Rigid Box")).await,
            Err(OmsError::Validation(_))
        ));
        assert!(matches!(
            wf.create_order(&staff(Role::Design), new_order("Box", "Rigid Box")).await,
            Err(OmsError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_bag_order_skips_diecut() {
        let wf = workflow_with(json!({"orders": {"k": {
            "order_id": "SRP001", "stage": "Lamination", "product_type": "Bag"
        }}}));
        let advanced = wf.advance(&admin(), "k", Some(Stage::Lamination)).await.unwrap();
        assert_eq!(advanced.to, Stage::Assembly);
        assert_eq!(advanced.order.stage, Stage::Assembly);
        assert!(advanced.order.text("lamination_completed_at").is_some());
        assert_eq!(advanced.order.text("lamination_completed_by"), Some("admin"));
    }

    #[tokio::test]
    async fn test_advance_respects_role_and_guard() {
        let wf = workflow_with(json!({"orders": {"k": {"stage": "Printing"}}}));
        assert!(matches!(
            wf.advance(&staff(Role::Design), "k", None).await,
            Err(OmsError::Forbidden { .. })
        ));
        assert!(matches!(
            wf.advance(&staff(Role::Printing), "k", Some(Stage::Design)).await,
            Err(OmsError::Lifecycle(LifecycleError::StageMismatch { .. }))
        ));
        let ok = wf.advance(&staff(Role::Printing), "k", Some(Stage::Printing)).await.unwrap();
        assert_eq!(ok.to, Stage::Lamination);
    }

    #[tokio::test]
    async fn test_packing_flow_needs_proof_and_timer() {
        let wf = workflow_with(json!({"orders": {"k": {"order_id": "SRP001", "stage": "Packing"}}}));
        let packer = staff(Role::Packing);

        let readiness = wf.readiness("k").await.unwrap();
        assert!(!readiness.ready);
        assert_eq!(readiness.missing.len(), 2);

        assert!(wf.stop_timer(&packer, "k", Stage::Packing).await.is_err());
        wf.start_timer(&packer, "k", Stage::Packing).await.unwrap();
        wf.upload_file(&packer, "k", "packing_file", b"%PDF-1.4 proof", "proof.pdf")
            .await
            .unwrap();
        // Re-upload replaces the first entry in place.
        let order = wf
            .upload_file(&packer, "k", "packing_file", b"\x89PNG\r\n\x1a\n", "proof.png")
            .await
            .unwrap();
        assert_eq!(order.file_at("packing_file").unwrap().ext(), Some("png"));
        wf.stop_timer(&packer, "k", Stage::Packing).await.unwrap();

        assert!(wf.readiness("k").await.unwrap().ready);
        let advanced = wf.advance(&packer, "k", None).await.unwrap();
        assert_eq!(advanced.to, Stage::Dispatch);

        let download = wf.download_file("k", "packing_file").await.unwrap();
        assert_eq!(download.mime, "image/png");
    }

    #[tokio::test]
    async fn test_upload_limits_and_slots() {
        let wf = workflow_with(json!({"orders": {"k": {"stage": "Design"}}}));
        let designer = staff(Role::Design);
        assert!(matches!(
            wf.upload_file(&designer, "k", "design_final", &[1u8; 65], "big.bin").await,
            Err(OmsError::PayloadTooLarge { .. })
        ));
        assert!(matches!(
            wf.upload_file(&designer, "k", "nope", b"x", "x").await,
            Err(OmsError::Lifecycle(LifecycleError::UnknownFileSlot { .. }))
        ));
        assert!(matches!(
            wf.upload_file(&designer, "k", "packing_file", b"x", "x").await,
            Err(OmsError::Forbidden { .. })
        ));
        assert!(matches!(
            wf.download_file("k", "design_final").await,
            Err(OmsError::FileMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_details_then_complete() {
        let wf = workflow_with(json!({"orders": {"k": {
            "stage": "Dispatch", "dispatch_start": "2024-12-01T10:00:00+05:30",
            "dispatch_end": "2024-12-01T11:00:00+05:30"
        }}}));
        let packer = staff(Role::Packing);
        assert!(wf.advance(&packer, "k", None).await.is_err());
        let updates = json!({"courier": "BlueDart", "tracking_number": 12345})
            .as_object()
            .cloned()
            .unwrap();
        let order = wf.update_details(&packer, "k", Stage::Dispatch, &updates).await.unwrap();
        assert_eq!(order.text("dispatch_tracking_number"), Some("12345"));
        let done = wf.advance(&packer, "k", None).await.unwrap();
        assert_eq!(done.to, Stage::Completed);
        assert!(done.order.text("completed_at").is_some());
        assert!(matches!(
            wf.advance(&admin(), "k", None).await,
            Err(OmsError::Lifecycle(LifecycleError::AlreadyCompleted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_and_override_are_admin_only() {
        let wf = workflow_with(json!({"orders": {
            "k": {"stage": "Assembly"},
            "bad": {"stage": "Storage"}
        }}));
        assert!(wf.delete_order(&staff(Role::Assembly), "k").await.is_err());
        let moved = wf.override_stage(&admin(), "k", Stage::Design).await.unwrap();
        assert_eq!(moved.order.stage, Stage::Design);

        assert!(wf.delete_order(&admin(), "bad").await.unwrap().is_none());
        assert!(wf.delete_order(&admin(), "k").await.unwrap().is_some());
        assert!(matches!(
            wf.order("k").await,
            Err(OmsError::OrderNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_customers_and_previous_orders() {
        let wf = workflow_with(json!({"orders": {
            "-P1": {"order_id": "SRP001", "customer": "ABC Traders", "customer_phone": "111", "stage": "Completed", "item": "Box A"},
            "-P2": {"order_id": "SRP002", "customer": "abc traders", "customer_phone": "222", "stage": "Design", "item": "Box B"},
            "-P3": {"order_id": "SRP003", "customer": "Zed", "stage": "Design"}
        }}));
        let customers = wf.customers().await.unwrap();
        assert_eq!(customers.len(), 2);
        assert_eq!(customers[0].orders, 2);
        assert_eq!(customers[0].phone, "222");

        let previous = wf.previous_orders("ABC TRADERS").await.unwrap();
        let ids: Vec<&str> = previous.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["SRP002", "SRP001"]);
    }

    #[tokio::test]
    async fn test_login_and_users() {
        let mut settings = PackflowToml::default();
        settings.auth.default_admin_password = Some("boss".into());
        let wf = Workflow::new(Arc::new(MemoryStore::new()), settings);

        let admin_user = wf.login("admin", "boss").await.unwrap();
        assert_eq!(admin_user.role, Role::Admin);
        assert!(wf.login("admin", "wrong").await.is_err());
        for name in ["a.b", "ad#min", "$root", "x/y", "[admin]"] {
            assert!(matches!(
                wf.login(name, "boss").await,
                Err(OmsError::Unauthorized)
            ));
        }

        let actor = Actor::system("admin");
        let view = wf
            .save_user(
                &actor,
                NewUser {
                    username: "ravi".into(),
                    role: "packaging".into(),
                    name: Some("Ravi".into()),
                    password: "pw".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(view.role, Role::Packing);
        assert_eq!(wf.login("ravi", "pw").await.unwrap().role, Role::Packing);
        assert_eq!(wf.list_users(&actor).await.unwrap().len(), 1);
        assert!(wf.list_users(&staff(Role::Packing)).await.is_err());
    }

    #[tokio::test]
    async fn test_tracking_qr_for_legacy_record() {
        let wf = workflow_with(json!({"orders": {"k": {"order_id": "SRP009", "stage": "Printing"}}}));
        let (order, png) = wf.tracking_qr("k").await.unwrap();
        assert_eq!(order.order_id, "SRP009");
        assert!(png.starts_with(b"\x89PNG"));
        assert!(matches!(
            wf.tracking_qr("missing").await,
            Err(OmsError::OrderNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_share_links() {
        let wf = workflow_with(json!({"orders": {"k": {
            "order_id": "SRP001", "customer": "ABC", "customer_phone": "9876543210", "stage": "Design"
        }}}));
        let share = wf.share("k").await.unwrap();
        assert_eq!(share.tracking_url, "https://srppackaging.com/tracking.html?id=SRP001");
        assert!(share.whatsapp_url.unwrap().starts_with("https://wa.me/919876543210?text="));
    }
}
