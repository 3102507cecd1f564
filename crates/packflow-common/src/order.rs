use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::stage::{ProductType, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    /// Sort key: High first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Metadata-carrying upload record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub data: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub uploaded_at: String,
    #[serde(default)]
    pub uploaded_by: String,
}

/// An uploaded file as it sits inside an order record. Older records hold a
/// bare base64 string; newer ones an object with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    Legacy(String),
    Stored(StoredFile),
}

impl FileEntry {
    /// Reads a slot value, treating empty strings, empty objects and
    /// payload-less objects as "nothing uploaded".
    pub fn from_value(value: &Value) -> Option<FileEntry> {
        let entry: FileEntry = serde_json::from_value(value.clone()).ok()?;
        if entry.data().is_empty() {
            None
        } else {
            Some(entry)
        }
    }

    pub fn data(&self) -> &str {
        match self {
            Self::Legacy(data) => data,
            Self::Stored(file) => &file.data,
        }
    }

    pub fn ext(&self) -> Option<&str> {
        match self {
            Self::Legacy(_) => None,
            Self::Stored(file) if !file.ext.is_empty() => Some(&file.ext),
            Self::Stored(_) => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Legacy(_) => None,
            Self::Stored(file) if !file.name.is_empty() => Some(&file.name),
            Self::Stored(_) => None,
        }
    }
}

/// A customer order. The common business fields are typed; every
/// stage-scoped field (`<prefix>_start`, `<prefix>_notes`, file slots, ...)
/// lives in `fields` and is reached through the accessors below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Store key under `orders/`. Not part of the record body.
    #[serde(skip)]
    pub key: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub order_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub customer: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub customer_phone: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub customer_email: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub item: String,
    #[serde(default, deserialize_with = "lenient::quantity")]
    pub qty: u64,
    #[serde(default, deserialize_with = "lenient::rate")]
    pub rate: f64,
    #[serde(default, deserialize_with = "lenient::priority")]
    pub priority: Priority,
    #[serde(default = "default_product_type", deserialize_with = "lenient::product_type")]
    pub product_type: ProductType,
    #[serde(default, deserialize_with = "lenient::string")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub received: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub due: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub advance: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub board_thickness_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub paper_thickness_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub size_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub foil_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub spotuv_id: String,
    pub stage: Stage,
    #[serde(default, deserialize_with = "lenient::string")]
    pub tracking_url: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub admin_notes: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn default_product_type() -> ProductType {
    ProductType::Box
}

impl Order {
    /// Parses a raw store record. The error string names the first field
    /// that failed, for the malformed-record report.
    pub fn from_record(key: &str, value: Value) -> Result<Order, String> {
        if !value.is_object() {
            return Err("record is not an object".to_string());
        }
        let mut order: Order = serde_json::from_value(value).map_err(|e| e.to_string())?;
        order.key = key.to_string();
        Ok(order)
    }

    /// Non-empty string value of a stage-scoped field.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// First non-empty value among `names`, for fields that older records
    /// stored under a different name.
    pub fn text_any(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.text(name))
    }

    /// Value at a slash-separated path under the stage-scoped fields,
    /// e.g. `design_files/final`.
    pub fn value_at(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('/');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn file_at(&self, path: &str) -> Option<FileEntry> {
        self.value_at(path).and_then(FileEntry::from_value)
    }

    pub fn total_value(&self) -> f64 {
        self.qty as f64 * self.rate
    }

    pub fn advance_paid(&self) -> bool {
        self.advance.eq_ignore_ascii_case("yes")
    }

    /// The record body as written to the store.
    pub fn to_record(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

mod lenient {
    use super::*;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => other.to_string(),
        })
    }

    pub fn quantity<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .unwrap_or(0),
            Value::String(s) => s.trim().parse::<f64>().map(|f| f.max(0.0) as u64).unwrap_or(0),
            _ => 0,
        })
    }

    pub fn rate<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        })
    }

    pub fn priority<'de, D: Deserializer<'de>>(d: D) -> Result<Priority, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => s.parse().unwrap_or_default(),
            _ => Priority::Medium,
        })
    }

    pub fn product_type<'de, D: Deserializer<'de>>(d: D) -> Result<ProductType, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(ProductType::Box),
            Value::String(s) if s.trim().is_empty() => Ok(ProductType::Box),
            Value::String(s) => s.parse().map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!(
                "Invalid product type: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "order_id": "SRP004",
            "customer": "ABC Traders",
            "item": "Rigid box",
            "qty": 500,
            "rate": 12.5,
            "priority": "High",
            "product_type": "Box",
            "stage": "Diecut",
            "diecut_start": "2024-12-01T10:00:00+05:30",
            "design_files": {"final": {"data": "JVBERi0=", "ext": "pdf", "name": "final.pdf"}}
        })
    }

    #[test]
    fn test_priority_display_pads() {
        assert_eq!(format!("{:^8}", Priority::High), "  High  ");
    }

    #[test]
    fn test_from_record_reads_typed_and_stage_fields() {
        let order = Order::from_record("-Mabc", sample()).unwrap();
        assert_eq!(order.key, "-Mabc");
        assert_eq!(order.order_id, "SRP004");
        assert_eq!(order.stage, Stage::DieCut);
        assert_eq!(order.priority, Priority::High);
        assert_eq!(order.text("diecut_start"), Some("2024-12-01T10:00:00+05:30"));
        assert!((order.total_value() - 6250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_priority_reads_as_medium() {
        let mut value = sample();
        value["priority"] = json!("Urgent");
        let order = Order::from_record("k", value).unwrap();
        assert_eq!(order.priority, Priority::Medium);
    }

    #[test]
    fn test_unknown_stage_is_malformed() {
        let mut value = sample();
        value["stage"] = json!("Storage");
        let err = Order::from_record("k", value).unwrap_err();
        assert!(err.contains("Storage"), "unexpected error: {err}");
    }

    #[test]
    fn test_missing_stage_is_malformed() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("stage");
        assert!(Order::from_record("k", value).is_err());
        assert!(Order::from_record("k", json!("oops")).is_err());
    }

    #[test]
    fn test_string_quantities_and_missing_product_type() {
        let order = Order::from_record(
            "k",
            json!({"stage": "Design", "qty": "250", "rate": "3.5", "customer": null}),
        )
        .unwrap();
        assert_eq!(order.qty, 250);
        assert_eq!(order.rate, 3.5);
        assert_eq!(order.product_type, ProductType::Box);
        assert_eq!(order.customer, "");
    }

    #[test]
    fn test_file_entries_in_both_shapes() {
        let order = Order::from_record(
            "k",
            json!({
                "stage": "Packing",
                "packing_file": "iVBORw0KGgo=",
                "lamination_file": {"data": "", "name": "empty"},
                "design_files": {"final": {"data": "JVBERi0=", "ext": "pdf"}}
            }),
        )
        .unwrap();
        assert_eq!(
            order.file_at("packing_file"),
            Some(FileEntry::Legacy("iVBORw0KGgo=".into()))
        );
        assert!(order.file_at("lamination_file").is_none());
        let final_art = order.file_at("design_files/final").unwrap();
        assert_eq!(final_art.ext(), Some("pdf"));
        assert!(order.file_at("design_files/reference").is_none());
    }

    #[test]
    fn test_to_record_keeps_extra_fields_and_drops_key() {
        let order = Order::from_record("-Mabc", sample()).unwrap();
        let record = order.to_record();
        assert!(record.get("key").is_none());
        assert_eq!(record["stage"], json!("DieCut"));
        assert_eq!(record["diecut_start"], json!("2024-12-01T10:00:00+05:30"));
    }

    #[test]
    fn test_text_any_falls_back_to_legacy_names() {
        let order = Order::from_record(
            "k",
            json!({"stage": "DieCut", "diecut_started_at": "2024-12-01 10:00:00"}),
        )
        .unwrap();
        assert_eq!(
            order.text_any(&["diecut_start", "diecut_started_at"]),
            Some("2024-12-01 10:00:00")
        );
    }
}
