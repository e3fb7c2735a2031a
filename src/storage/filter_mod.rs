// src/storage/filter_mod.rs
// In-memory query pipeline for the object store: filter, order, offset,
// limit. Mirrors what SQLite does with the SQL that sql_builder emits, so a
// query selects the same records on every backend.

use std::cmp::Ordering;

use serde_json::Value;

use super::schema_mod::StoreConfig;
use super::{record_id, FilterOperator, QueryFilter, QueryOptions, Record, SortDirection, StorageError, ID_FIELD};

/// Apply filters, ordering and pagination to a materialized collection.
/// `records` must arrive in key order.
pub fn apply_query(records: Vec<Record>, options: &QueryOptions) -> Result<Vec<Record>, StorageError> {
    for filter in &options.filters {
        filter.validate()?;
    }

    let mut selected: Vec<Record> = records
        .into_iter()
        .filter(|record| matches_all(record, &options.filters))
        .collect();

    if !options.order_by.is_empty() {
        // Stable sort over key-ordered input gives the same id tie-break as SQL.
        selected.sort_by(|a, b| {
            for criteria in &options.order_by {
                let ordering = compare_values(field(a, &criteria.field), field(b, &criteria.field));
                if ordering != Ordering::Equal {
                    return match criteria.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    };
                }
            }
            record_id(a).cmp(&record_id(b))
        });
    }

    let start = options.offset.unwrap_or(0);
    if start >= selected.len() {
        return Ok(Vec::new());
    }
    let end = match options.limit {
        Some(limit) => std::cmp::min(start.saturating_add(limit), selected.len()),
        None => selected.len(),
    };
    Ok(selected.drain(start..end).collect())
}

pub fn count_matching(records: &[Record], filters: &[QueryFilter]) -> Result<u64, StorageError> {
    for filter in filters {
        filter.validate()?;
    }
    Ok(records.iter().filter(|record| matches_all(record, filters)).count() as u64)
}

/// Apply each filtered column's affinity to the filter's operands, as SQLite
/// does when comparing a column with a bound parameter. `contains` compares
/// text and is left alone.
pub fn conform_filters(filters: &[QueryFilter], config: &StoreConfig) -> Vec<QueryFilter> {
    filters
        .iter()
        .map(|filter| {
            let affinity = match config.affinity(&filter.field) {
                Some(affinity) if filter.operator != FilterOperator::Contains => affinity,
                _ => return filter.clone(),
            };
            let value = match (&filter.operator, &filter.value) {
                (FilterOperator::Between | FilterOperator::In, Value::Array(items)) => {
                    Value::Array(items.iter().map(|item| affinity.apply(item)).collect())
                }
                // Left for `validate` to reject.
                (_, Value::Array(_)) | (_, Value::Object(_)) => filter.value.clone(),
                (_, scalar) => affinity.apply(scalar),
            };
            QueryFilter {
                field: filter.field.clone(),
                operator: filter.operator,
                value,
            }
        })
        .collect()
}

fn matches_all(record: &Record, filters: &[QueryFilter]) -> bool {
    filters.iter().all(|filter| matches_filter(record, filter))
}

fn field<'a>(record: &'a Record, name: &str) -> &'a Value {
    record.get(name).unwrap_or(&Value::Null)
}

/// SQL semantics: a NULL (or missing) field satisfies no operator.
pub fn matches_filter(record: &Record, filter: &QueryFilter) -> bool {
    let actual = field(record, &filter.field);
    if actual.is_null() {
        return false;
    }

    match filter.operator {
        FilterOperator::Equals => sql_eq(actual, &filter.value),
        FilterOperator::Contains => {
            if filter.value.is_null() {
                return false;
            }
            let haystack = sql_text(actual).to_ascii_lowercase();
            let needle = sql_text(&filter.value).to_ascii_lowercase();
            haystack.contains(&needle)
        }
        FilterOperator::GreaterThan => {
            !filter.value.is_null() && compare_values(actual, &filter.value) == Ordering::Greater
        }
        FilterOperator::LessThan => {
            !filter.value.is_null() && compare_values(actual, &filter.value) == Ordering::Less
        }
        FilterOperator::Between => match &filter.value {
            Value::Array(bounds) if bounds.len() == 2 => {
                let (low, high) = (&bounds[0], &bounds[1]);
                !low.is_null()
                    && !high.is_null()
                    && compare_values(actual, low) != Ordering::Less
                    && compare_values(actual, high) != Ordering::Greater
            }
            _ => false,
        },
        FilterOperator::In => match &filter.value {
            Value::Array(candidates) => candidates.iter().any(|candidate| sql_eq(actual, candidate)),
            _ => false,
        },
    }
}

fn sql_eq(a: &Value, b: &Value) -> bool {
    !a.is_null() && !b.is_null() && compare_values(a, b) == Ordering::Equal
}

/// Storage-class rank in SQLite's sort order: NULL < numeric < text.
/// Arrays and objects are stored as JSON text by the relational adapters.
fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) | Value::Number(_) => 1,
        Value::String(_) | Value::Array(_) | Value::Object(_) => 2,
    }
}

fn as_number(value: &Value) -> f64 {
    match value {
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Text form of a value, as SQLite renders it for LIKE.
fn sql_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => (*b as i64).to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Total order over JSON values matching SQLite's cross-type comparison.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => {}
        other => return other,
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => as_number(a).partial_cmp(&as_number(b)).unwrap_or(Ordering::Equal),
        },
        _ if rank(a) == 1 => as_number(a).partial_cmp(&as_number(b)).unwrap_or(Ordering::Equal),
        _ => sql_text(a).cmp(&sql_text(b)),
    }
}

/// Shallow merge: keys in `partial` overwrite, all others stay. The id is
/// never taken from `partial`.
pub fn merge_records(mut existing: Record, partial: Record) -> Record {
    for (key, value) in partial {
        if key != ID_FIELD {
            existing.insert(key, value);
        }
    }
    existing
}
