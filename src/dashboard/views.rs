//! Read-side projections of the order collection: the stage board,
//! department queues and list filters. Everything here is computed from a
//! single snapshot of `orders`.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use packflow_common::lifecycle::{self, Deadlines};
use packflow_common::timefmt::{self, TimerStatus};
use packflow_common::{Order, Priority, ProductType, Stage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored record that could not be read as an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MalformedRecord {
    pub key: String,
    pub reason: String,
}

/// Parsed snapshot of the `orders` collection.
#[derive(Debug, Clone, Default)]
pub struct OrderSet {
    pub orders: Vec<Order>,
    pub malformed: Vec<MalformedRecord>,
}

impl OrderSet {
    /// Parse the raw collection. Records that fail are reported, not dropped.
    pub fn from_collection(raw: Option<Value>) -> Self {
        let mut set = OrderSet::default();
        let Some(Value::Object(records)) = raw else {
            return set;
        };
        for (key, value) in records {
            match Order::from_record(&key, value) {
                Ok(order) => set.orders.push(order),
                Err(reason) => set.malformed.push(MalformedRecord { key, reason }),
            }
        }
        set
    }
}

/// List-friendly view of an order without stage fields or file payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub key: String,
    pub order_id: String,
    pub customer: String,
    pub item: String,
    pub qty: u64,
    pub priority: Priority,
    pub product_type: ProductType,
    pub category: String,
    pub stage: Stage,
    pub received: String,
    pub due: String,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            key: order.key.clone(),
            order_id: order.order_id.clone(),
            customer: order.customer.clone(),
            item: order.item.clone(),
            qty: order.qty,
            priority: order.priority,
            product_type: order.product_type,
            category: order.category.clone(),
            stage: order.stage,
            received: order.received.clone(),
            due: order.due.clone(),
        }
    }
}

/// Full order JSON with every file payload replaced by its metadata.
pub fn order_detail(order: &Order) -> Value {
    let mut record = order.to_record();
    if let Value::Object(map) = &mut record {
        map.insert("key".into(), Value::from(order.key.clone()));
        for spec in lifecycle::STAGE_SPECS {
            for slot in spec.file_slots {
                if let Some(entry) = order.file_at(slot.path) {
                    let mut meta = Map::new();
                    meta.insert("uploaded".into(), Value::Bool(true));
                    meta.insert("slot".into(), Value::from(slot.name));
                    if let Some(name) = entry.name() {
                        meta.insert("name".into(), Value::from(name));
                    }
                    if let Some(ext) = entry.ext() {
                        meta.insert("ext".into(), Value::from(ext));
                    }
                    if let packflow_common::FileEntry::Stored(file) = &entry {
                        meta.insert("size".into(), Value::from(file.size));
                        meta.insert("uploaded_at".into(), Value::from(file.uploaded_at.clone()));
                        meta.insert("uploaded_by".into(), Value::from(file.uploaded_by.clone()));
                    }
                    replace_at(map, slot.path, Value::Object(meta));
                }
            }
        }
    }
    record
}

fn replace_at(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('/') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = map.get_mut(head) {
                replace_at(child, rest, value);
            }
        }
    }
}

// ── Board ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StageGroup {
    pub stage: Stage,
    pub orders: Vec<OrderSummary>,
}

/// One group per stage, in pipeline order. Groups are disjoint and cover
/// every order in `orders`.
pub fn partition_by_stage(orders: &[Order]) -> Vec<StageGroup> {
    let mut groups: BTreeMap<Stage, Vec<&Order>> = Stage::ALL.iter().map(|s| (*s, Vec::new())).collect();
    for order in orders {
        groups.entry(order.stage).or_default().push(order);
    }
    groups
        .into_iter()
        .map(|(stage, mut members)| {
            members.sort_by(|a, b| {
                a.priority
                    .rank()
                    .cmp(&b.priority.rank())
                    .then_with(|| a.key.cmp(&b.key))
            });
            StageGroup {
                stage,
                orders: members.into_iter().map(OrderSummary::from).collect(),
            }
        })
        .collect()
}

// ── Filters ───────────────────────────────────────────────────────────

/// Query-string filters for order lists. Unparseable values match nothing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub search: Option<String>,
    pub priority: Option<String>,
    pub customer: Option<String>,
    pub assigned_to: Option<String>,
    pub stage: Option<String>,
    pub product_type: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(search) = non_empty(&self.search) {
            let needle = search.to_lowercase();
            let hit = [&order.order_id, &order.customer, &order.item]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if let Some(priority) = non_empty(&self.priority) {
            match priority.parse::<Priority>() {
                Ok(p) if p == order.priority => {}
                _ => return false,
            }
        }
        if let Some(customer) = non_empty(&self.customer)
            && !order.customer.trim().eq_ignore_ascii_case(customer)
        {
            return false;
        }
        if let Some(stage) = non_empty(&self.stage) {
            match stage.parse::<Stage>() {
                Ok(s) if s == order.stage => {}
                _ => return false,
            }
        }
        if let Some(product) = non_empty(&self.product_type) {
            match product.parse::<ProductType>() {
                Ok(p) if p == order.product_type => {}
                _ => return false,
            }
        }
        if let Some(person) = non_empty(&self.assigned_to) {
            let assigned = Stage::departments()
                .filter_map(|stage| lifecycle::detail(order, stage, "assigned_to"))
                .any(|name| name.trim().eq_ignore_ascii_case(person));
            if !assigned {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, orders: &'a [Order]) -> Vec<&'a Order> {
        orders.iter().filter(|o| self.matches(o)).collect()
    }
}

// ── Department queues ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerView {
    pub state: &'static str,
    pub elapsed_seconds: i64,
    pub elapsed: String,
}

impl TimerView {
    pub fn new(status: TimerStatus, now: DateTime<FixedOffset>) -> Self {
        let elapsed = status.elapsed(now);
        Self {
            state: status.label(),
            elapsed_seconds: elapsed.num_seconds().max(0),
            elapsed: timefmt::format_elapsed(elapsed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadlineView {
    pub overdue: bool,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingEntry {
    #[serde(flatten)]
    pub order: OrderSummary,
    pub arrived_at: Option<String>,
    pub timer: TimerView,
    pub deadline: Option<DeadlineView>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedEntry {
    #[serde(flatten)]
    pub order: OrderSummary,
    pub completed_at: Option<String>,
    pub completed_by: Option<String>,
}

/// An order whose completion stamps contradict its current stage.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyEntry {
    #[serde(flatten)]
    pub order: OrderSummary,
    pub stamped_stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepartmentView {
    pub stage: Stage,
    pub pending: Vec<PendingEntry>,
    pub completed: Vec<CompletedEntry>,
    pub anomalies: Vec<AnomalyEntry>,
}

pub fn department_view(
    orders: &[Order],
    stage: Stage,
    now: DateTime<FixedOffset>,
    offset: FixedOffset,
    deadlines: &Deadlines,
) -> DepartmentView {
    let relevant = orders.iter().filter(|o| o.product_type.visits(stage));

    let mut pending: Vec<(u8, Option<DateTime<FixedOffset>>, PendingEntry)> = Vec::new();
    let mut completed: Vec<(Option<DateTime<FixedOffset>>, CompletedEntry)> = Vec::new();
    let mut anomalies = Vec::new();

    for order in relevant {
        let stamped = lifecycle::completion_anomalies(order);
        if stamped.contains(&stage) {
            anomalies.push(AnomalyEntry {
                order: OrderSummary::from(order),
                stamped_stages: stamped,
            });
        }

        if order.stage == stage {
            let arrived = lifecycle::arrived_at(order, stage, offset);
            let deadline = match (arrived, deadlines.window(stage)) {
                (Some(at), Some(window)) => {
                    let status = timefmt::deadline_status(at, now, window);
                    Some(DeadlineView {
                        overdue: status.is_overdue(),
                        text: status.describe(),
                    })
                }
                _ => None,
            };
            let entry = PendingEntry {
                order: OrderSummary::from(order),
                arrived_at: arrived.map(timefmt::format_display),
                timer: TimerView::new(lifecycle::timer(order, stage, offset), now),
                deadline,
                missing: lifecycle::readiness(order)
                    .iter()
                    .map(|r| r.to_string())
                    .collect(),
            };
            pending.push((order.priority.rank(), arrived, entry));
        } else if let Some(raw) = lifecycle::completion_raw(order, stage) {
            let at = timefmt::parse_timestamp(raw, offset);
            completed.push((
                at,
                CompletedEntry {
                    order: OrderSummary::from(order),
                    completed_at: Some(at.map(timefmt::format_display).unwrap_or_else(|| raw.to_string())),
                    completed_by: lifecycle::completed_by(order, stage).map(str::to_string),
                },
            ));
        }
    }

    // Priority first, then oldest arrival; unknown arrival goes last.
    pending.sort_by(|a, b| {
        a.0.cmp(&b.0).then_with(|| match (a.1, b.1) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        })
    });
    // Newest completion first.
    completed.sort_by(|a, b| b.0.cmp(&a.0));

    DepartmentView {
        stage,
        pending: pending.into_iter().map(|(_, _, e)| e).collect(),
        completed: completed.into_iter().map(|(_, e)| e).collect(),
        anomalies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ist() -> FixedOffset {
        timefmt::offset(timefmt::DEFAULT_OFFSET_MINUTES)
    }

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-12-03T12:00:00+05:30").unwrap()
    }

    fn sample_set() -> OrderSet {
        OrderSet::from_collection(Some(json!({
            "-P1": {"order_id": "SRP001", "customer": "ABC Traders", "item": "Rigid box",
                    "priority": "Low", "product_type": "Box", "stage": "Packing",
                    "assembly_completed_at": "2024-12-01T10:00:00+05:30"},
            "-P2": {"order_id": "SRP002", "customer": "XYZ Bags", "item": "Kraft bag",
                    "priority": "High", "product_type": "Bag", "stage": "Packing",
                    "assembly_completed_at": "2024-12-02T10:00:00+05:30",
                    "packing_assigned_to": "Ravi"},
            "-P3": {"order_id": "SRP003", "customer": "ABC Traders", "item": "Mono carton",
                    "priority": "Medium", "product_type": "Box", "stage": "Dispatch",
                    "packing_completed_at": "2024-12-02T18:00:00+05:30",
                    "packing_completed_by": "Ravi"},
            "-P4": {"order_id": "SRP004", "customer": "Old Co", "stage": "Storage"},
            "-P5": {"order_id": "SRP005", "customer": "Old Co", "stage": "Completed",
                    "product_type": "Bag",
                    "packaging_completed_at": "2024-11-20T09:00:00+05:30"}
        })))
    }

    #[test]
    fn test_from_collection_reports_malformed() {
        let set = sample_set();
        assert_eq!(set.orders.len(), 4);
        assert_eq!(set.malformed.len(), 1);
        assert_eq!(set.malformed[0].key, "-P4");
        assert!(OrderSet::from_collection(None).orders.is_empty());
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let set = sample_set();
        let groups = partition_by_stage(&set.orders);
        assert_eq!(groups.len(), Stage::ALL.len());
        let total: usize = groups.iter().map(|g| g.orders.len()).sum();
        assert_eq!(total, set.orders.len());
        let mut keys: Vec<&str> = groups
            .iter()
            .flat_map(|g| g.orders.iter().map(|o| o.key.as_str()))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), set.orders.len());
        let packing = groups.iter().find(|g| g.stage == Stage::Packing).unwrap();
        assert_eq!(packing.orders[0].order_id, "SRP002");
    }

    #[test]
    fn test_department_view_packing() {
        let set = sample_set();
        let view = department_view(&set.orders, Stage::Packing, now(), ist(), &Deadlines::default());
        let pending: Vec<&str> = view.pending.iter().map(|e| e.order.order_id.as_str()).collect();
        assert_eq!(pending, vec!["SRP002", "SRP001"]);

        // SRP001 arrived 2024-12-01 10:00, 36h window ended 2024-12-02 22:00.
        let srp001 = &view.pending[1];
        assert!(srp001.deadline.as_ref().unwrap().overdue);
        assert_eq!(srp001.timer.state, "not_started");
        assert!(srp001.missing.iter().any(|m| m.contains("Packing proof")));

        let srp002 = &view.pending[0];
        assert!(!srp002.deadline.as_ref().unwrap().overdue);

        let completed: Vec<&str> = view.completed.iter().map(|e| e.order.order_id.as_str()).collect();
        assert_eq!(completed, vec!["SRP003", "SRP005"]);
        assert_eq!(view.completed[0].completed_by.as_deref(), Some("Ravi"));
        assert!(view.anomalies.is_empty());
    }

    #[test]
    fn test_bag_orders_never_in_diecut_view() {
        let set = OrderSet::from_collection(Some(json!({
            "a": {"stage": "DieCut", "product_type": "Bag"},
            "b": {"stage": "DieCut", "product_type": "Box"}
        })));
        let view = department_view(&set.orders, Stage::DieCut, now(), ist(), &Deadlines::default());
        assert_eq!(view.pending.len(), 1);
        assert_eq!(view.pending[0].order.key, "b");
    }

    #[test]
    fn test_contradicting_stamp_is_anomaly() {
        let set = OrderSet::from_collection(Some(json!({
            "a": {"stage": "Printing", "printing_completed_at": "2024-12-01T10:00:00+05:30"}
        })));
        let view = department_view(&set.orders, Stage::Printing, now(), ist(), &Deadlines::default());
        assert_eq!(view.pending.len(), 1);
        assert_eq!(view.anomalies.len(), 1);
        assert_eq!(view.anomalies[0].stamped_stages, vec![Stage::Printing]);
    }

    #[test]
    fn test_filters() {
        let set = sample_set();
        let by_search = OrderFilter {
            search: Some("kraft".into()),
            ..Default::default()
        };
        assert_eq!(by_search.apply(&set.orders).len(), 1);

        let by_customer = OrderFilter {
            customer: Some("abc traders".into()),
            priority: Some("low".into()),
            ..Default::default()
        };
        let hits = by_customer.apply(&set.orders);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].order_id, "SRP001");

        let by_person = OrderFilter {
            assigned_to: Some("ravi".into()),
            ..Default::default()
        };
        assert_eq!(by_person.apply(&set.orders).len(), 1);

        let bad_stage = OrderFilter {
            stage: Some("Storage".into()),
            ..Default::default()
        };
        assert!(bad_stage.apply(&set.orders).is_empty());
    }

    #[test]
    fn test_order_detail_strips_payloads() {
        let order = Order::from_record(
            "k",
            json!({"stage": "Design", "design_files": {"final": {"data": "JVBERi0=", "ext": "pdf", "name": "f.pdf"}}}),
        )
        .unwrap();
        let detail = order_detail(&order);
        assert_eq!(detail["key"], json!("k"));
        let final_art = &detail["design_files"]["final"];
        assert_eq!(final_art["uploaded"], json!(true));
        assert_eq!(final_art["name"], json!("f.pdf"));
        assert!(final_art.get("data").is_none());
    }
}
