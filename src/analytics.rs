//! Admin reporting: stage counts, department throughput and CSV export.

use std::collections::BTreeMap;

use chrono::{Duration, FixedOffset};
use packflow_common::lifecycle;
use packflow_common::timefmt;
use packflow_common::{Order, Stage};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageCount {
    pub stage: Stage,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub per_stage: Vec<StageCount>,
    pub total_value: f64,
}

/// Mean time an order spends in one department.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentDuration {
    pub stage: Stage,
    pub samples: usize,
    pub average_seconds: i64,
    pub average: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub stage: Stage,
    pub at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTimeline {
    pub key: String,
    pub order_id: String,
    pub events: Vec<TimelineEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analytics {
    pub overview: Overview,
    pub durations: Vec<DepartmentDuration>,
    pub slowest: Option<DepartmentDuration>,
    pub timelines: Vec<OrderTimeline>,
}

pub fn overview(orders: &[Order]) -> Overview {
    let per_stage: Vec<StageCount> = Stage::ALL
        .iter()
        .map(|stage| StageCount {
            stage: *stage,
            count: orders.iter().filter(|o| o.stage == *stage).count(),
        })
        .collect();
    let completed = orders.iter().filter(|o| o.stage.is_terminal()).count();
    Overview {
        total: orders.len(),
        active: orders.len() - completed,
        completed,
        per_stage,
        total_value: orders.iter().map(Order::total_value).sum(),
    }
}

/// Average time between consecutive completion stamps per department.
/// Design is measured from `received`. Pairs that do not parse or run
/// backwards are skipped.
pub fn department_durations(orders: &[Order], offset: FixedOffset) -> Vec<DepartmentDuration> {
    let mut totals: BTreeMap<Stage, (Duration, usize)> = BTreeMap::new();
    for order in orders {
        for stage in order.product_type.pipeline() {
            if stage.is_terminal() {
                continue;
            }
            let Some(end) = lifecycle::completed_at(order, *stage, offset) else {
                continue;
            };
            let Some(start) = lifecycle::arrived_at(order, *stage, offset) else {
                continue;
            };
            if end < start {
                continue;
            }
            let entry = totals.entry(*stage).or_insert((Duration::zero(), 0));
            entry.0 += end - start;
            entry.1 += 1;
        }
    }
    totals
        .into_iter()
        .map(|(stage, (total, samples))| {
            let average = total / samples as i32;
            DepartmentDuration {
                stage,
                samples,
                average_seconds: average.num_seconds(),
                average: timefmt::format_elapsed(average),
            }
        })
        .collect()
}

pub fn slowest(durations: &[DepartmentDuration]) -> Option<DepartmentDuration> {
    durations
        .iter()
        .max_by_key(|d| d.average_seconds)
        .cloned()
}

/// Every completion stamp of an order, oldest first.
pub fn timeline(order: &Order, offset: FixedOffset) -> OrderTimeline {
    let mut stamped: Vec<_> = order
        .product_type
        .pipeline()
        .iter()
        .filter_map(|stage| lifecycle::completed_at(order, *stage, offset).map(|at| (at, *stage)))
        .collect();
    stamped.sort();
    OrderTimeline {
        key: order.key.clone(),
        order_id: order.order_id.clone(),
        events: stamped
            .into_iter()
            .map(|(at, stage)| TimelineEvent {
                stage,
                at: timefmt::format_display(at),
            })
            .collect(),
    }
}

pub fn compute(orders: &[Order], offset: FixedOffset) -> Analytics {
    let durations = department_durations(orders, offset);
    Analytics {
        overview: overview(orders),
        slowest: slowest(&durations),
        durations,
        timelines: orders
            .iter()
            .map(|o| timeline(o, offset))
            .filter(|t| !t.events.is_empty())
            .collect(),
    }
}

// ── CSV ───────────────────────────────────────────────────────────────

const CSV_COLUMNS: &[&str] = &[
    "order_id",
    "customer",
    "customer_phone",
    "customer_email",
    "item",
    "product_type",
    "category",
    "qty",
    "rate",
    "total_value",
    "priority",
    "advance",
    "stage",
    "received",
    "due",
];

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_row(order: &Order) -> Vec<String> {
    vec![
        order.order_id.clone(),
        order.customer.clone(),
        order.customer_phone.clone(),
        order.customer_email.clone(),
        order.item.clone(),
        order.product_type.to_string(),
        order.category.clone(),
        order.qty.to_string(),
        format!("{:.2}", order.rate),
        format!("{:.2}", order.total_value()),
        order.priority.to_string(),
        order.advance.clone(),
        order.stage.to_string(),
        order.received.clone(),
        order.due.clone(),
    ]
}

/// RFC 4180 export with CRLF line endings and a header row.
pub fn export_csv(orders: &[&Order]) -> String {
    let mut out = CSV_COLUMNS.join(",");
    out.push_str("\r\n");
    for order in orders {
        let line: Vec<String> = csv_row(order).iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ist() -> FixedOffset {
        timefmt::offset(timefmt::DEFAULT_OFFSET_MINUTES)
    }

    fn orders() -> Vec<Order> {
        vec![
            Order::from_record(
                "a",
                json!({
                    "order_id": "SRP001", "customer": "ABC, Traders", "item": "Box \"XL\"",
                    "qty": 100, "rate": 2.5, "stage": "Lamination", "product_type": "Box",
                    "received": "2024-12-01T10:00:00+05:30",
                    "design_completed_at": "2024-12-01T12:00:00+05:30",
                    "printing_completed_at": "2024-12-02T12:00:00+05:30"
                }),
            )
            .unwrap(),
            Order::from_record(
                "b",
                json!({
                    "order_id": "SRP002", "customer": "XYZ", "qty": 10, "rate": 1.0,
                    "stage": "Completed", "product_type": "Bag",
                    "received": "2024-12-01 09:00",
                    "design_completed_at": "2024-12-01T13:00:00+05:30"
                }),
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_overview_counts() {
        let o = overview(&orders());
        assert_eq!(o.total, 2);
        assert_eq!(o.completed, 1);
        assert_eq!(o.active, 1);
        assert_eq!(o.per_stage.len(), Stage::ALL.len());
        let lamination = o.per_stage.iter().find(|c| c.stage == Stage::Lamination).unwrap();
        assert_eq!(lamination.count, 1);
        assert!((o.total_value - 260.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_department_durations_and_slowest() {
        let durations = department_durations(&orders(), ist());
        let design = durations.iter().find(|d| d.stage == Stage::Design).unwrap();
        // 2h and 4h.
        assert_eq!(design.samples, 2);
        assert_eq!(design.average_seconds, 3 * 3600);
        let printing = durations.iter().find(|d| d.stage == Stage::Printing).unwrap();
        assert_eq!(printing.average_seconds, 24 * 3600);
        assert_eq!(slowest(&durations).unwrap().stage, Stage::Printing);
    }

    #[test]
    fn test_timeline_is_chronological() {
        let t = timeline(&orders()[0], ist());
        let stages: Vec<Stage> = t.events.iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![Stage::Design, Stage::Printing]);
        assert_eq!(t.events[0].at, "01 Dec 2024, 12:00 PM");
    }

    #[test]
    fn test_export_csv_quotes_fields() {
        let all = orders();
        let refs: Vec<&Order> = all.iter().collect();
        let csv = export_csv(&refs);
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert!(lines[0].starts_with("order_id,customer,"));
        assert!(lines[1].starts_with("SRP001,\"ABC, Traders\",,,\"Box \"\"XL\"\"\",Box,"));
        assert!(lines[1].contains(",100,2.50,250.00,Medium,"));
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], "");
    }

    #[test]
    fn test_empty_inputs() {
        let a = compute(&[], ist());
        assert_eq!(a.overview.total, 0);
        assert!(a.durations.is_empty());
        assert!(a.slowest.is_none());
    }
}
