//! The order state machine.
//!
//! Nothing here touches storage. Each `plan_*` function inspects an
//! [`Order`] and returns the partial-field [`Patch`] the caller should write,
//! or the [`LifecycleError`] explaining why the mutation is refused.

use std::fmt;

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::order::Order;
use crate::stage::{ProductType, Stage};
use crate::timefmt::{self, TimerStatus};

/// Partial-field update. Keys may be slash-separated paths
/// (`design_files/final`); a `null` value deletes.
pub type Patch = Map<String, Value>;

/// An upload location on the order record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSlot {
    /// Name used in URLs.
    pub name: &'static str,
    /// Store path relative to the order record.
    pub path: &'static str,
    pub label: &'static str,
    pub stage: Stage,
}

/// An unmet precondition for leaving the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Requirement {
    TimerStopped,
    FileUploaded(&'static str),
    DetailSet(&'static str),
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimerStopped => f.write_str("timer must be stopped"),
            Self::FileUploaded(label) => write!(f, "{} must be uploaded", label),
            Self::DetailSet(field) => write!(f, "{} must be filled in", field.replace('_', " ")),
        }
    }
}

/// Static per-stage configuration.
#[derive(Debug)]
pub struct StageSpec {
    pub stage: Stage,
    pub detail_fields: &'static [&'static str],
    pub file_slots: &'static [FileSlot],
    pub requires_timer_stop: bool,
    pub required_files: &'static [&'static str],
    pub required_details: &'static [&'static str],
    /// Stage whose completion starts the overdue clock.
    pub overdue_anchor: Option<Stage>,
}

const DESIGN_SLOTS: &[FileSlot] = &[
    FileSlot {
        name: "design_reference",
        path: "design_files/reference",
        label: "Reference artwork",
        stage: Stage::Design,
    },
    FileSlot {
        name: "design_template",
        path: "design_files/template",
        label: "Die template",
        stage: Stage::Design,
    },
    FileSlot {
        name: "design_final",
        path: "design_files/final",
        label: "Final art",
        stage: Stage::Design,
    },
];

const PRINTING_SLOTS: &[FileSlot] = &[FileSlot {
    name: "printing_mockup",
    path: "printing_mockups/mockup",
    label: "Print mockup",
    stage: Stage::Printing,
}];

const LAMINATION_SLOTS: &[FileSlot] = &[FileSlot {
    name: "lamination_file",
    path: "lamination_file",
    label: "Lamination proof",
    stage: Stage::Lamination,
}];

const DIECUT_SLOTS: &[FileSlot] = &[FileSlot {
    name: "diecut_file",
    path: "diecut_file",
    label: "Die-cut proof",
    stage: Stage::DieCut,
}];

const ASSEMBLY_SLOTS: &[FileSlot] = &[FileSlot {
    name: "assembly_file",
    path: "assembly_file",
    label: "Assembly proof",
    stage: Stage::Assembly,
}];

const PACKING_SLOTS: &[FileSlot] = &[FileSlot {
    name: "packing_file",
    path: "packing_file",
    label: "Packing proof",
    stage: Stage::Packing,
}];

pub const STAGE_SPECS: &[StageSpec] = &[
    StageSpec {
        stage: Stage::Design,
        detail_fields: &["assigned_to", "notes"],
        file_slots: DESIGN_SLOTS,
        requires_timer_stop: false,
        required_files: &["design_final"],
        required_details: &[],
        overdue_anchor: None,
    },
    StageSpec {
        stage: Stage::Printing,
        detail_fields: &[
            "assigned_to",
            "paper_quality",
            "paper_size",
            "board_size",
            "wastage",
            "notes",
        ],
        file_slots: PRINTING_SLOTS,
        requires_timer_stop: false,
        required_files: &[],
        required_details: &[],
        overdue_anchor: None,
    },
    StageSpec {
        stage: Stage::Lamination,
        detail_fields: &["assigned_to", "type", "material", "reel_width", "notes"],
        file_slots: LAMINATION_SLOTS,
        requires_timer_stop: false,
        required_files: &[],
        required_details: &[],
        overdue_anchor: None,
    },
    StageSpec {
        stage: Stage::DieCut,
        detail_fields: &[
            "assigned_to",
            "machine",
            "blade",
            "die_paper",
            "die_board",
            "cut_per_sheet",
            "cut_per_board",
            "total_sheets",
            "total_boards",
            "notes",
        ],
        file_slots: DIECUT_SLOTS,
        requires_timer_stop: true,
        required_files: &["diecut_file"],
        required_details: &[],
        overdue_anchor: None,
    },
    StageSpec {
        stage: Stage::Assembly,
        detail_fields: &["assigned_to", "materials", "notes"],
        file_slots: ASSEMBLY_SLOTS,
        requires_timer_stop: false,
        required_files: &[],
        required_details: &[],
        overdue_anchor: None,
    },
    StageSpec {
        stage: Stage::Packing,
        detail_fields: &["assigned_to", "material", "notes"],
        file_slots: PACKING_SLOTS,
        requires_timer_stop: true,
        required_files: &["packing_file"],
        required_details: &[],
        overdue_anchor: Some(Stage::Assembly),
    },
    StageSpec {
        stage: Stage::Dispatch,
        detail_fields: &["courier", "tracking_number", "notes"],
        file_slots: &[],
        requires_timer_stop: true,
        required_files: &[],
        required_details: &["courier", "tracking_number"],
        overdue_anchor: Some(Stage::Packing),
    },
];

pub fn stage_spec(stage: Stage) -> Option<&'static StageSpec> {
    STAGE_SPECS.iter().find(|spec| spec.stage == stage)
}

pub fn file_slot(name: &str) -> Option<&'static FileSlot> {
    STAGE_SPECS
        .iter()
        .flat_map(|spec| spec.file_slots.iter())
        .find(|slot| slot.name == name)
}

/// Display-only overdue windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deadlines {
    pub packing_hours: i64,
    pub dispatch_hours: i64,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            packing_hours: 36,
            dispatch_hours: 48,
        }
    }
}

impl Deadlines {
    pub fn window(&self, stage: Stage) -> Option<Duration> {
        match stage {
            Stage::Packing => Some(Duration::hours(self.packing_hours)),
            Stage::Dispatch => Some(Duration::hours(self.dispatch_hours)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    #[error("Order {order_id} is already completed")]
    AlreadyCompleted { order_id: String },

    #[error("Order is not ready to leave {stage}: {}", describe_missing(.missing))]
    NotReady {
        stage: Stage,
        missing: Vec<Requirement>,
    },

    #[error("Order stage changed: expected {expected}, found {actual}")]
    StageMismatch { expected: Stage, actual: Stage },

    #[error("{stage} is not part of the {product} pipeline")]
    NotInPipeline { stage: Stage, product: ProductType },

    #[error("Order is in {actual}, not {expected}")]
    WrongStage { expected: Stage, actual: Stage },

    #[error("{stage} timer already started")]
    TimerAlreadyStarted { stage: Stage },

    #[error("{stage} timer has not been started")]
    TimerNotStarted { stage: Stage },

    #[error("{stage} timer already stopped")]
    TimerAlreadyStopped { stage: Stage },

    #[error("Unknown {stage} detail field: {field}")]
    UnknownDetailField { stage: Stage, field: String },

    #[error("Unknown file slot: {slot}")]
    UnknownFileSlot { slot: String },
}

fn describe_missing(missing: &[Requirement]) -> String {
    missing
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The write that moves an order one step forward.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvancePlan {
    pub from: Stage,
    pub to: Stage,
    pub patch: Patch,
}

// ── Field access ───────────────────────────────────────────────────

fn field(stage: Stage, suffix: &str) -> Option<String> {
    stage.prefix().map(|p| format!("{}_{}", p, suffix))
}

fn timer_start_raw(order: &Order, stage: Stage) -> Option<&str> {
    let prefix = stage.prefix()?;
    order.text_any(&[
        &format!("{prefix}_start"),
        &format!("{prefix}_started_at"),
        &format!("{prefix}_start_time"),
    ])
}

fn timer_end_raw(order: &Order, stage: Stage) -> Option<&str> {
    let prefix = stage.prefix()?;
    order.text_any(&[
        &format!("{prefix}_end"),
        &format!("{prefix}_ended_at"),
        &format!("{prefix}_end_time"),
    ])
}

/// Raw completion stamp for `stage`, including names older records used.
pub fn completion_raw(order: &Order, stage: Stage) -> Option<&str> {
    let prefix = stage.prefix()?;
    let canonical = format!("{prefix}_completed_at");
    match stage {
        Stage::Packing => order.text_any(&[&canonical, "packaging_completed_at"]),
        Stage::Dispatch => order.text_any(&[&canonical, "dispatched_at"]),
        _ => order.text(&canonical),
    }
}

pub fn completed_at(
    order: &Order,
    stage: Stage,
    offset: FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    completion_raw(order, stage).and_then(|raw| timefmt::parse_timestamp(raw, offset))
}

pub fn completed_by(order: &Order, stage: Stage) -> Option<&str> {
    order.text(&field(stage, "completed_by")?)
}

pub fn timer(order: &Order, stage: Stage, offset: FixedOffset) -> TimerStatus {
    let start = timer_start_raw(order, stage).and_then(|raw| timefmt::parse_timestamp(raw, offset));
    let end = timer_end_raw(order, stage).and_then(|raw| timefmt::parse_timestamp(raw, offset));
    timefmt::timer_status(start, end)
}

pub fn detail<'a>(order: &'a Order, stage: Stage, name: &str) -> Option<&'a str> {
    order.text(&field(stage, name)?)
}

/// When the order arrived at `stage`: the previous stage's completion, or
/// the received date for the first stage.
pub fn arrived_at(
    order: &Order,
    stage: Stage,
    offset: FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    match order.product_type.previous_stage(stage) {
        Some(prev) => completed_at(order, prev, offset),
        None => timefmt::parse_timestamp(&order.received, offset),
    }
}

/// Stages at or after the current one that already carry a completion
/// stamp. A consistent record has none.
pub fn completion_anomalies(order: &Order) -> Vec<Stage> {
    let pipeline = order.product_type.pipeline();
    let Some(current) = order.product_type.position(order.stage) else {
        return Vec::new();
    };
    pipeline[current..]
        .iter()
        .copied()
        .filter(|stage| completion_raw(order, *stage).is_some())
        .collect()
}

// ── Planning ───────────────────────────────────────────────────────

fn ensure_in_pipeline(order: &Order, stage: Stage) -> Result<(), LifecycleError> {
    if stage.is_terminal() || !order.product_type.visits(stage) {
        return Err(LifecycleError::NotInPipeline {
            stage,
            product: order.product_type,
        });
    }
    Ok(())
}

fn ensure_current(order: &Order, stage: Stage) -> Result<(), LifecycleError> {
    ensure_in_pipeline(order, stage)?;
    if order.stage != stage {
        return Err(LifecycleError::WrongStage {
            expected: stage,
            actual: order.stage,
        });
    }
    Ok(())
}

/// Unmet requirements for leaving the order's current stage.
pub fn readiness(order: &Order) -> Vec<Requirement> {
    let Some(spec) = stage_spec(order.stage) else {
        return Vec::new();
    };
    let mut missing = Vec::new();
    for name in spec.required_files {
        if let Some(slot) = file_slot(name)
            && order.file_at(slot.path).is_none()
        {
            missing.push(Requirement::FileUploaded(slot.label));
        }
    }
    if spec.requires_timer_stop && timer_end_raw(order, order.stage).is_none() {
        missing.push(Requirement::TimerStopped);
    }
    for name in spec.required_details {
        if detail(order, order.stage, name).is_none() {
            missing.push(Requirement::DetailSet(name));
        }
    }
    missing
}

pub fn plan_advance(
    order: &Order,
    now: DateTime<FixedOffset>,
    actor: &str,
    expected_stage: Option<Stage>,
) -> Result<AdvancePlan, LifecycleError> {
    if let Some(expected) = expected_stage
        && expected != order.stage
    {
        return Err(LifecycleError::StageMismatch {
            expected,
            actual: order.stage,
        });
    }
    if order.stage.is_terminal() {
        return Err(LifecycleError::AlreadyCompleted {
            order_id: order.order_id.clone(),
        });
    }
    ensure_in_pipeline(order, order.stage)?;

    let missing = readiness(order);
    if !missing.is_empty() {
        return Err(LifecycleError::NotReady {
            stage: order.stage,
            missing,
        });
    }

    let next = order
        .product_type
        .next_stage(order.stage)
        .ok_or(LifecycleError::NotInPipeline {
            stage: order.stage,
            product: order.product_type,
        })?;
    let stamp = timefmt::format_timestamp(now);
    let prefix = order.stage.prefix().unwrap_or_default();

    let mut patch = Patch::new();
    patch.insert("stage".into(), Value::from(next.as_str()));
    patch.insert(format!("{prefix}_completed_at"), Value::from(stamp.clone()));
    patch.insert(format!("{prefix}_completed_by"), Value::from(actor));
    let end = timer_end_raw(order, order.stage)
        .map(str::to_string)
        .unwrap_or_else(|| stamp.clone());
    patch.insert(format!("{prefix}_end"), Value::from(end));
    if next.is_terminal() {
        patch.insert("completed_at".into(), Value::from(stamp));
    }

    Ok(AdvancePlan {
        from: order.stage,
        to: next,
        patch,
    })
}

pub fn plan_timer_start(
    order: &Order,
    stage: Stage,
    now: DateTime<FixedOffset>,
    actor: &str,
) -> Result<Patch, LifecycleError> {
    ensure_current(order, stage)?;
    if timer_start_raw(order, stage).is_some() {
        return Err(LifecycleError::TimerAlreadyStarted { stage });
    }
    let prefix = stage.prefix().unwrap_or_default();
    let mut patch = Patch::new();
    patch.insert(
        format!("{prefix}_start"),
        Value::from(timefmt::format_timestamp(now)),
    );
    patch.insert(format!("{prefix}_started_by"), Value::from(actor));
    Ok(patch)
}

pub fn plan_timer_stop(
    order: &Order,
    stage: Stage,
    now: DateTime<FixedOffset>,
    actor: &str,
) -> Result<Patch, LifecycleError> {
    ensure_current(order, stage)?;
    if timer_start_raw(order, stage).is_none() {
        return Err(LifecycleError::TimerNotStarted { stage });
    }
    if timer_end_raw(order, stage).is_some() {
        return Err(LifecycleError::TimerAlreadyStopped { stage });
    }
    let prefix = stage.prefix().unwrap_or_default();
    let mut patch = Patch::new();
    patch.insert(
        format!("{prefix}_end"),
        Value::from(timefmt::format_timestamp(now)),
    );
    patch.insert(format!("{prefix}_ended_by"), Value::from(actor));
    Ok(patch)
}

/// Detail edits for one stage. Keys are bare field names (`courier`);
/// non-string scalars are stored as text and `null` clears a field.
pub fn plan_detail_update(
    order: &Order,
    stage: Stage,
    updates: &Map<String, Value>,
) -> Result<Patch, LifecycleError> {
    ensure_in_pipeline(order, stage)?;
    let spec = stage_spec(stage).ok_or(LifecycleError::NotInPipeline {
        stage,
        product: order.product_type,
    })?;
    let prefix = stage.prefix().unwrap_or_default();
    let mut patch = Patch::new();
    for (name, value) in updates {
        if !spec.detail_fields.contains(&name.as_str()) {
            return Err(LifecycleError::UnknownDetailField {
                stage,
                field: name.clone(),
            });
        }
        let value = match value {
            Value::Null | Value::String(_) => value.clone(),
            Value::Number(n) => Value::from(n.to_string()),
            Value::Bool(b) => Value::from(b.to_string()),
            other => Value::from(other.to_string()),
        };
        patch.insert(format!("{prefix}_{name}"), value);
    }
    Ok(patch)
}

/// Writes `entry` into the slot's path, replacing whatever was there.
pub fn plan_file_upload(
    order: &Order,
    slot_name: &str,
    entry: Value,
) -> Result<(Patch, &'static FileSlot), LifecycleError> {
    let slot = file_slot(slot_name).ok_or_else(|| LifecycleError::UnknownFileSlot {
        slot: slot_name.to_string(),
    })?;
    ensure_in_pipeline(order, slot.stage)?;
    let mut patch = Patch::new();
    patch.insert(slot.path.to_string(), entry);
    Ok((patch, slot))
}

/// Admin override of the current stage. The target must lie on the
/// order's pipeline; no readiness checks apply.
pub fn plan_stage_override(order: &Order, target: Stage) -> Result<Patch, LifecycleError> {
    if !order.product_type.visits(target) {
        return Err(LifecycleError::NotInPipeline {
            stage: target,
            product: order.product_type,
        });
    }
    let mut patch = Patch::new();
    patch.insert("stage".into(), Value::from(target.as_str()));
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ist() -> FixedOffset {
        timefmt::offset(timefmt::DEFAULT_OFFSET_MINUTES)
    }

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-12-01T14:00:00+05:30").unwrap()
    }

    fn order(value: serde_json::Value) -> Order {
        Order::from_record("-Mkey", value).unwrap()
    }

    #[test]
    fn test_design_requires_final_art() {
        let o = order(json!({"order_id": "SRP001", "stage": "Design", "product_type": "Box"}));
        assert_eq!(readiness(&o), vec![Requirement::FileUploaded("Final art")]);
        let err = plan_advance(&o, now(), "alice", None).unwrap_err();
        assert!(matches!(err, LifecycleError::NotReady { stage: Stage::Design, .. }));
    }

    #[test]
    fn test_advance_design_stamps_completion() {
        let o = order(json!({
            "order_id": "SRP001",
            "stage": "Design",
            "product_type": "Bag",
            "design_files": {"final": {"data": "JVBERi0=", "ext": "pdf"}}
        }));
        let plan = plan_advance(&o, now(), "alice", Some(Stage::Design)).unwrap();
        assert_eq!(plan.from, Stage::Design);
        assert_eq!(plan.to, Stage::Printing);
        assert_eq!(plan.patch["stage"], json!("Printing"));
        assert_eq!(plan.patch["design_completed_at"], json!("2024-12-01T14:00:00+05:30"));
        assert_eq!(plan.patch["design_completed_by"], json!("alice"));
        assert_eq!(plan.patch["design_end"], json!("2024-12-01T14:00:00+05:30"));
        assert!(!plan.patch.contains_key("completed_at"));
    }

    #[test]
    fn test_advance_keeps_existing_timer_end() {
        let o = order(json!({
            "stage": "Printing",
            "printing_start": "2024-12-01T09:00:00+05:30",
            "printing_end": "2024-12-01T11:00:00+05:30"
        }));
        let plan = plan_advance(&o, now(), "bob", None).unwrap();
        assert_eq!(plan.patch["printing_end"], json!("2024-12-01T11:00:00+05:30"));
    }

    #[test]
    fn test_bag_skips_diecut_on_advance() {
        let o = order(json!({"stage": "Lamination", "product_type": "Bag"}));
        let plan = plan_advance(&o, now(), "x", None).unwrap();
        assert_eq!(plan.to, Stage::Assembly);

        let o = order(json!({"stage": "Lamination", "product_type": "Box"}));
        let plan = plan_advance(&o, now(), "x", None).unwrap();
        assert_eq!(plan.to, Stage::DieCut);
    }

    #[test]
    fn test_bag_stuck_in_diecut_is_not_in_pipeline() {
        let o = order(json!({"stage": "DieCut", "product_type": "Bag"}));
        assert!(matches!(
            plan_advance(&o, now(), "x", None),
            Err(LifecycleError::NotInPipeline { stage: Stage::DieCut, product: ProductType::Bag })
        ));
    }

    #[test]
    fn test_diecut_needs_timer_stop_and_proof() {
        let o = order(json!({
            "stage": "DieCut",
            "product_type": "Box",
            "diecut_start": "2024-12-01T09:00:00+05:30"
        }));
        assert_eq!(
            readiness(&o),
            vec![
                Requirement::FileUploaded("Die-cut proof"),
                Requirement::TimerStopped
            ]
        );
    }

    #[test]
    fn test_dispatch_needs_courier_and_tracking() {
        let o = order(json!({
            "stage": "Dispatch",
            "dispatch_start": "2024-12-01T09:00:00+05:30",
            "dispatch_end": "2024-12-01T10:00:00+05:30",
            "dispatch_courier": "BlueDart"
        }));
        assert_eq!(readiness(&o), vec![Requirement::DetailSet("tracking_number")]);
    }

    #[test]
    fn test_dispatch_advance_completes_order() {
        let o = order(json!({
            "stage": "Dispatch",
            "dispatch_start": "2024-12-01T09:00:00+05:30",
            "dispatch_end": "2024-12-01T10:00:00+05:30",
            "dispatch_courier": "BlueDart",
            "dispatch_tracking_number": "BD123"
        }));
        let plan = plan_advance(&o, now(), "dan", None).unwrap();
        assert_eq!(plan.to, Stage::Completed);
        assert_eq!(plan.patch["completed_at"], json!("2024-12-01T14:00:00+05:30"));
        assert_eq!(plan.patch["dispatch_completed_by"], json!("dan"));
    }

    #[test]
    fn test_completed_order_cannot_advance() {
        let o = order(json!({"order_id": "SRP009", "stage": "Completed"}));
        assert_eq!(
            plan_advance(&o, now(), "x", None),
            Err(LifecycleError::AlreadyCompleted {
                order_id: "SRP009".into()
            })
        );
    }

    #[test]
    fn test_stale_expected_stage_conflicts() {
        let o = order(json!({"stage": "Printing"}));
        assert_eq!(
            plan_advance(&o, now(), "x", Some(Stage::Design)),
            Err(LifecycleError::StageMismatch {
                expected: Stage::Design,
                actual: Stage::Printing
            })
        );
    }

    #[test]
    fn test_timer_start_then_stop() {
        let o = order(json!({"stage": "Packing"}));
        let patch = plan_timer_start(&o, Stage::Packing, now(), "pat").unwrap();
        assert_eq!(patch["packing_start"], json!("2024-12-01T14:00:00+05:30"));
        assert_eq!(patch["packing_started_by"], json!("pat"));

        assert_eq!(
            plan_timer_stop(&o, Stage::Packing, now(), "pat"),
            Err(LifecycleError::TimerNotStarted {
                stage: Stage::Packing
            })
        );

        let started = order(json!({"stage": "Packing", "packing_start": "2024-12-01T09:00:00+05:30"}));
        assert_eq!(
            plan_timer_start(&started, Stage::Packing, now(), "pat"),
            Err(LifecycleError::TimerAlreadyStarted {
                stage: Stage::Packing
            })
        );
        let patch = plan_timer_stop(&started, Stage::Packing, now(), "pat").unwrap();
        assert_eq!(patch["packing_end"], json!("2024-12-01T14:00:00+05:30"));

        let stopped = order(json!({
            "stage": "Packing",
            "packing_start": "2024-12-01T09:00:00+05:30",
            "packing_end": "2024-12-01T10:00:00+05:30"
        }));
        assert_eq!(
            plan_timer_stop(&stopped, Stage::Packing, now(), "pat"),
            Err(LifecycleError::TimerAlreadyStopped {
                stage: Stage::Packing
            })
        );
    }

    #[test]
    fn test_timer_requires_current_stage() {
        let o = order(json!({"stage": "Printing"}));
        assert_eq!(
            plan_timer_start(&o, Stage::Packing, now(), "x"),
            Err(LifecycleError::WrongStage {
                expected: Stage::Packing,
                actual: Stage::Printing
            })
        );
    }

    #[test]
    fn test_legacy_timer_field_is_honoured() {
        let o = order(json!({
            "stage": "DieCut",
            "diecut_started_at": "2024-12-01 09:00:00"
        }));
        assert!(matches!(timer(&o, Stage::DieCut, ist()), TimerStatus::Running { .. }));
        assert!(plan_timer_start(&o, Stage::DieCut, now(), "x").is_err());
    }

    #[test]
    fn test_design_time_fields_are_honoured() {
        let o = order(json!({
            "stage": "Design",
            "design_start_time": "01 Dec 2024, 09:00 AM",
            "design_end_time": "01 Dec 2024, 11:00 AM",
            "design_files": {"final": {"data": "JVBERi0=", "ext": "pdf"}}
        }));
        match timer(&o, Stage::Design, ist()) {
            TimerStatus::Finished { elapsed } => assert_eq!(elapsed.num_hours(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            plan_timer_start(&o, Stage::Design, now(), "x"),
            Err(LifecycleError::TimerAlreadyStarted { .. })
        ));
        let plan = plan_advance(&o, now(), "alice", None).unwrap();
        assert_eq!(plan.patch["design_end"], json!("01 Dec 2024, 11:00 AM"));
    }

    #[test]
    fn test_detail_update_validates_fields() {
        let o = order(json!({"stage": "Dispatch"}));
        let mut updates = Map::new();
        updates.insert("courier".into(), json!("DTDC"));
        updates.insert("notes".into(), json!(42));
        let patch = plan_detail_update(&o, Stage::Dispatch, &updates).unwrap();
        assert_eq!(patch["dispatch_courier"], json!("DTDC"));
        assert_eq!(patch["dispatch_notes"], json!("42"));

        updates.insert("machine".into(), json!("M1"));
        assert!(matches!(
            plan_detail_update(&o, Stage::Dispatch, &updates),
            Err(LifecycleError::UnknownDetailField { .. })
        ));
    }

    #[test]
    fn test_file_upload_targets_slot_path() {
        let o = order(json!({"stage": "Design", "product_type": "Bag"}));
        let (patch, slot) = plan_file_upload(&o, "design_final", json!({"data": "abc"})).unwrap();
        assert_eq!(slot.stage, Stage::Design);
        assert_eq!(patch["design_files/final"], json!({"data": "abc"}));

        assert!(matches!(
            plan_file_upload(&o, "diecut_file", json!({"data": "abc"})),
            Err(LifecycleError::NotInPipeline { .. })
        ));
        assert!(matches!(
            plan_file_upload(&o, "selfie", json!({"data": "abc"})),
            Err(LifecycleError::UnknownFileSlot { .. })
        ));
    }

    #[test]
    fn test_stage_override_respects_pipeline() {
        let o = order(json!({"stage": "Assembly", "product_type": "Bag"}));
        assert_eq!(
            plan_stage_override(&o, Stage::Printing).unwrap()["stage"],
            json!("Printing")
        );
        assert!(plan_stage_override(&o, Stage::DieCut).is_err());
    }

    #[test]
    fn test_arrival_and_anomalies() {
        let o = order(json!({
            "stage": "Packing",
            "product_type": "Bag",
            "received": "2024-11-28",
            "assembly_completed_at": "2024-11-30T10:00:00+05:30",
            "packaging_completed_at": "2024-12-01T10:00:00+05:30"
        }));
        assert_eq!(
            arrived_at(&o, Stage::Packing, ist()),
            DateTime::parse_from_rfc3339("2024-11-30T10:00:00+05:30").ok()
        );
        assert_eq!(completion_anomalies(&o), vec![Stage::Packing]);
        assert!(arrived_at(&o, Stage::Design, ist()).is_some());
    }

    #[test]
    fn test_not_ready_message_lists_requirements() {
        let err = LifecycleError::NotReady {
            stage: Stage::Packing,
            missing: vec![
                Requirement::FileUploaded("Packing proof"),
                Requirement::TimerStopped,
            ],
        };
        assert_eq!(
            err.to_string(),
            "Order is not ready to leave Packing: Packing proof must be uploaded, timer must be stopped"
        );
    }
}
