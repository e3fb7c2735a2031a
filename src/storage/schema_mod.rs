// src/storage/schema_mod.rs
// Collection declarations for the object store. The relational backends
// get the same shape from the baseline migration script instead, and the
// column affinities declared here mirror that script's column types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::ID_FIELD;

/// Name of the migration bookkeeping table/collection.
pub const MIGRATIONS_TABLE: &str = "_migrations";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub key_path: String,
    pub auto_increment: bool,
    pub indexes: Vec<IndexConfig>,
    /// Declared column types. Undeclared fields keep whatever they are given.
    #[serde(default)]
    pub columns: BTreeMap<String, Affinity>,
}

/// SQLite column affinity: how a value is converted when stored in, or
/// compared against, a column of that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    Text,
    Integer,
    Real,
}

impl Affinity {
    /// Convert a scalar the way SQLite does for this affinity. Arrays and
    /// objects reach SQLite as JSON text.
    pub fn apply(&self, value: &Value) -> Value {
        let value = match value {
            Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
            Value::Bool(b) => Value::from(*b as i64),
            other => other.clone(),
        };
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (Affinity::Text, Value::Number(n)) => Value::String(number_text(&n)),
            (Affinity::Text, other) => other,
            (Affinity::Integer, Value::String(text)) => match parse_numeric(&text) {
                Some(number) => integral(number),
                None => Value::String(text),
            },
            (Affinity::Integer, Value::Number(n)) => integral(n),
            (Affinity::Real, Value::String(text)) => match parse_numeric(&text) {
                Some(number) => real(&number),
                None => Value::String(text),
            },
            (Affinity::Real, Value::Number(n)) => real(&n),
            (_, other) => other,
        }
    }
}

/// Text form SQLite gives a number: integers as written, whole reals with a
/// trailing `.0`.
fn number_text(n: &Number) -> String {
    match n.as_i64() {
        Some(i) => i.to_string(),
        None => {
            let f = n.as_f64().unwrap_or(0.0);
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{:.1}", f)
            } else {
                f.to_string()
            }
        }
    }
}

/// A well-formed integer or real literal, surrounding whitespace allowed.
fn parse_numeric(text: &str) -> Option<Number> {
    let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace());
    let well_formed = trimmed.bytes().any(|b| b.is_ascii_digit())
        && trimmed.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !well_formed {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::from(i));
    }
    trimmed.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Reals with no fractional part that fit an i64 become integers.
fn integral(n: Number) -> Value {
    if n.is_i64() {
        return Value::Number(n);
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Value::from(f as i64),
        _ => Value::Number(n),
    }
}

fn real(n: &Number) -> Value {
    n.as_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub key_path: String,
    pub unique: bool,
}

impl StoreConfig {
    /// Auto-incremented integer key under `id`.
    pub fn keyed() -> Self {
        Self {
            key_path: ID_FIELD.to_string(),
            auto_increment: true,
            indexes: Vec::new(),
            columns: BTreeMap::new(),
        }
    }

    fn with_columns(mut self, affinity: Affinity, fields: &[&str]) -> Self {
        for field in fields {
            self.columns.insert(field.to_string(), affinity);
        }
        self
    }

    pub fn text(self, fields: &[&str]) -> Self {
        self.with_columns(Affinity::Text, fields)
    }

    pub fn integer(self, fields: &[&str]) -> Self {
        self.with_columns(Affinity::Integer, fields)
    }

    pub fn real(self, fields: &[&str]) -> Self {
        self.with_columns(Affinity::Real, fields)
    }

    pub fn affinity(&self, field: &str) -> Option<Affinity> {
        self.columns.get(field).copied()
    }

    /// Add non-unique index named after its field
    pub fn with_index(mut self, field: &str) -> Self {
        self.indexes.push(IndexConfig {
            name: field.to_string(),
            key_path: field.to_string(),
            unique: false,
        });
        self
    }

    /// Add unique index named after its field
    pub fn with_unique_index(mut self, field: &str) -> Self {
        self.indexes.push(IndexConfig {
            name: field.to_string(),
            key_path: field.to_string(),
            unique: true,
        });
        self
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.indexes.iter().filter(|i| i.unique).map(|i| i.key_path.as_str())
    }
}

/// Every collection the application uses, declared up front.
pub fn object_store_schema() -> Vec<(String, StoreConfig)> {
    let stores = vec![
        (
            MIGRATIONS_TABLE,
            StoreConfig::keyed()
                .with_unique_index("version")
                .integer(&["version"])
                .text(&["name", "executed_at"]),
        ),
        (
            "settings",
            StoreConfig::keyed()
                .with_unique_index("setting_key")
                .text(&["setting_key", "setting_value", "updated_at"]),
        ),
        (
            "accounts",
            StoreConfig::keyed()
                .with_unique_index("code")
                .with_index("account_type")
                .with_index("parent_id")
                .text(&["code", "name", "account_type", "created_at"])
                .integer(&["parent_id", "is_active"]),
        ),
        (
            "customers",
            StoreConfig::keyed()
                .with_unique_index("customer_code")
                .with_index("display_name")
                .with_index("status")
                .text(&["customer_code", "display_name", "email", "phone", "status", "created_at"])
                .real(&["credit_limit"]),
        ),
        (
            "vendors",
            StoreConfig::keyed()
                .with_unique_index("vendor_code")
                .with_index("display_name")
                .with_index("status")
                .text(&["vendor_code", "display_name", "email", "phone", "status", "created_at"]),
        ),
        (
            "products",
            StoreConfig::keyed()
                .with_unique_index("sku")
                .with_index("status")
                .text(&["sku", "name", "status", "created_at"])
                .real(&["unit_price", "quantity_on_hand"]),
        ),
        (
            "inventory_movements",
            StoreConfig::keyed()
                .with_index("product_id")
                .with_index("movement_date")
                .integer(&["product_id"])
                .text(&["movement_date", "movement_type", "reference"])
                .real(&["quantity"]),
        ),
        (
            "journal_entries",
            StoreConfig::keyed()
                .with_unique_index("entry_number")
                .with_index("entry_date")
                .with_index("status")
                .text(&[
                    "entry_number",
                    "entry_date",
                    "memo",
                    "status",
                    "total_debit",
                    "total_credit",
                    "created_at",
                ]),
        ),
        (
            "journal_entry_lines",
            StoreConfig::keyed()
                .with_index("journal_entry_id")
                .with_index("account_id")
                .integer(&["journal_entry_id", "account_id", "line_number"])
                .text(&["debit", "credit", "description"]),
        ),
        (
            "invoices",
            StoreConfig::keyed()
                .with_unique_index("invoice_number")
                .with_index("customer_id")
                .with_index("status")
                .integer(&["customer_id"])
                .text(&["invoice_number", "invoice_date", "due_date", "status", "total_amount", "created_at"]),
        ),
        (
            "bills",
            StoreConfig::keyed()
                .with_unique_index("bill_number")
                .with_index("vendor_id")
                .with_index("status")
                .integer(&["vendor_id"])
                .text(&["bill_number", "bill_date", "due_date", "status", "total_amount", "created_at"]),
        ),
        (
            "purchase_orders",
            StoreConfig::keyed()
                .with_unique_index("po_number")
                .with_index("vendor_id")
                .with_index("status")
                .integer(&["vendor_id"])
                .text(&["po_number", "order_date", "status", "total_amount", "created_at"]),
        ),
    ];

    stores.into_iter().map(|(name, config)| (name.to_string(), config)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_affinity_renders_numbers_as_sqlite_does() {
        assert_eq!(Affinity::Text.apply(&json!(42)), json!("42"));
        assert_eq!(Affinity::Text.apply(&json!(12.5)), json!("12.5"));
        assert_eq!(Affinity::Text.apply(&json!(100.0)), json!("100.0"));
        assert_eq!(Affinity::Text.apply(&json!(true)), json!("1"));
        assert_eq!(Affinity::Text.apply(&json!("abc")), json!("abc"));
    }

    #[test]
    fn numeric_affinities_convert_well_formed_text() {
        assert_eq!(Affinity::Real.apply(&json!("12.50")), json!(12.5));
        assert_eq!(Affinity::Real.apply(&json!(7)), json!(7.0));
        assert_eq!(Affinity::Real.apply(&json!(" 3 ")), json!(3.0));
        assert_eq!(Affinity::Integer.apply(&json!("42")), json!(42));
        assert_eq!(Affinity::Integer.apply(&json!("3.0")), json!(3));
        assert_eq!(Affinity::Integer.apply(&json!("2.5")), json!(2.5));
        assert_eq!(Affinity::Integer.apply(&json!(false)), json!(0));
    }

    #[test]
    fn non_numeric_text_and_null_are_left_alone() {
        assert_eq!(Affinity::Real.apply(&json!("twelve")), json!("twelve"));
        assert_eq!(Affinity::Integer.apply(&json!("inf")), json!("inf"));
        assert_eq!(Affinity::Integer.apply(&json!("1-2")), json!("1-2"));
        assert_eq!(Affinity::Real.apply(&Value::Null), Value::Null);
    }

    #[test]
    fn schema_declares_affinities_for_every_indexed_field() {
        for (name, config) in object_store_schema() {
            for index in &config.indexes {
                assert!(config.affinity(&index.key_path).is_some(), "{}.{}", name, index.key_path);
            }
        }
    }
}
