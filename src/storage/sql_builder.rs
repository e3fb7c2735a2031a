// src/storage/sql_builder.rs
// Translates contract operations into parameterized SQLite statements.
// Shared by the desktop (IPC) and mobile (plugin) relational adapters.

use serde_json::Value;

use super::validation_mod::{validate_identifier, validate_identifiers};
use super::{FilterOperator, QueryFilter, QueryOptions, Record, RecordId, StorageError, ID_FIELD};

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlStatement {
    fn new(sql: String, params: Vec<Value>) -> Self {
        Self { sql, params }
    }
}

pub fn build_insert(table: &str, record: &Record) -> Result<SqlStatement, StorageError> {
    validate_identifier(table)?;
    validate_identifiers(record.keys().map(String::as_str))?;

    if record.is_empty() {
        return Ok(SqlStatement::new(format!("INSERT INTO {} DEFAULT VALUES", table), vec![]));
    }

    let columns: Vec<&str> = record.keys().map(String::as_str).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!("INSERT INTO {} ({}) VALUES ({})", table, columns.join(", "), placeholders);
    Ok(SqlStatement::new(sql, record.values().cloned().collect()))
}

/// `UPDATE ... SET` over exactly the supplied fields.
pub fn build_update(table: &str, id: RecordId, partial: &Record) -> Result<SqlStatement, StorageError> {
    validate_identifier(table)?;
    validate_identifiers(partial.keys().map(String::as_str))?;
    if partial.is_empty() {
        return Err(StorageError::InvalidRecord {
            reason: "update with no fields".to_string(),
        });
    }

    let assignments: Vec<String> = partial.keys().map(|k| format!("{} = ?", k)).collect();
    let mut params: Vec<Value> = partial.values().cloned().collect();
    params.push(Value::from(id));
    let sql = format!("UPDATE {} SET {} WHERE {} = ?", table, assignments.join(", "), ID_FIELD);
    Ok(SqlStatement::new(sql, params))
}

pub fn build_delete(table: &str, id: RecordId) -> Result<SqlStatement, StorageError> {
    validate_identifier(table)?;
    Ok(SqlStatement::new(
        format!("DELETE FROM {} WHERE {} = ?", table, ID_FIELD),
        vec![Value::from(id)],
    ))
}

pub fn build_find_by_id(table: &str, id: RecordId) -> Result<SqlStatement, StorageError> {
    validate_identifier(table)?;
    Ok(SqlStatement::new(
        format!("SELECT * FROM {} WHERE {} = ? LIMIT 1", table, ID_FIELD),
        vec![Value::from(id)],
    ))
}

pub fn build_select(table: &str, options: &QueryOptions) -> Result<SqlStatement, StorageError> {
    validate_identifier(table)?;

    let mut params = Vec::new();
    let mut sql = format!("SELECT * FROM {}", table);
    sql.push_str(&build_where(&options.filters, &mut params)?);
    sql.push_str(&build_order_by(options)?);

    match (options.limit.map(sql_bound), options.offset.map(sql_bound)) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
        (None, None) => {}
    }

    Ok(SqlStatement::new(sql, params))
}

/// SQLite takes LIMIT/OFFSET as i64; anything larger means "all" / "none".
fn sql_bound(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub fn build_count(table: &str, filters: &[QueryFilter]) -> Result<SqlStatement, StorageError> {
    validate_identifier(table)?;
    let mut params = Vec::new();
    let sql = format!("SELECT COUNT(*) AS count FROM {}{}", table, build_where(filters, &mut params)?);
    Ok(SqlStatement::new(sql, params))
}

/// ` WHERE a AND b ...`, or an empty string when there are no filters.
fn build_where(filters: &[QueryFilter], params: &mut Vec<Value>) -> Result<String, StorageError> {
    if filters.is_empty() {
        return Ok(String::new());
    }

    let mut clauses = Vec::with_capacity(filters.len());
    for filter in filters {
        filter.validate()?;
        validate_identifier(&filter.field)?;
        clauses.push(build_condition(filter, params));
    }
    Ok(format!(" WHERE {}", clauses.join(" AND ")))
}

fn build_condition(filter: &QueryFilter, params: &mut Vec<Value>) -> String {
    let field = &filter.field;
    match filter.operator {
        FilterOperator::Equals => {
            params.push(filter.value.clone());
            format!("{} = ?", field)
        }
        FilterOperator::Contains => {
            params.push(Value::String(format!("%{}%", escape_like(&like_text(&filter.value)))));
            format!("{} LIKE ? ESCAPE '\\'", field)
        }
        FilterOperator::GreaterThan => {
            params.push(filter.value.clone());
            format!("{} > ?", field)
        }
        FilterOperator::LessThan => {
            params.push(filter.value.clone());
            format!("{} < ?", field)
        }
        FilterOperator::Between => {
            // validate() guarantees a two-element array
            if let Value::Array(bounds) = &filter.value {
                params.extend(bounds.iter().cloned());
            }
            format!("{} BETWEEN ? AND ?", field)
        }
        FilterOperator::In => {
            let values = match &filter.value {
                Value::Array(values) => values.as_slice(),
                _ => &[],
            };
            if values.is_empty() {
                return "0 = 1".to_string();
            }
            params.extend(values.iter().cloned());
            format!("{} IN ({})", field, vec!["?"; values.len()].join(", "))
        }
    }
}

fn build_order_by(options: &QueryOptions) -> Result<String, StorageError> {
    let mut terms = Vec::with_capacity(options.order_by.len() + 1);
    for criteria in &options.order_by {
        validate_identifier(&criteria.field)?;
        terms.push(format!("{} {}", criteria.field, criteria.direction.as_sql()));
    }
    // id breaks ties so pages are stable across calls and backends
    if !options.order_by.iter().any(|c| c.field == ID_FIELD) {
        terms.push(format!("{} ASC", ID_FIELD));
    }
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}

/// Text form of a `contains` needle, as SQLite would render the value.
fn like_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => (*b as i64).to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Split a script into statements on `;` outside of string literals and
/// `--` comments.
pub fn split_script(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut chars = script.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            '-' if !in_string && chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            ';' if !in_string => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SortDirection;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn insert_uses_supplied_columns_only() {
        let stmt = build_insert("customers", &record(json!({"display_name": "Acme", "status": "active"}))).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO customers (display_name, status) VALUES (?, ?)");
        assert_eq!(stmt.params, vec![json!("Acme"), json!("active")]);
    }

    #[test]
    fn empty_insert_uses_default_values() {
        let stmt = build_insert("settings", &Record::new()).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO settings DEFAULT VALUES");
    }

    #[test]
    fn update_sets_only_partial_fields() {
        let stmt = build_update("customers", 7, &record(json!({"status": "inactive"}))).unwrap();
        assert_eq!(stmt.sql, "UPDATE customers SET status = ? WHERE id = ?");
        assert_eq!(stmt.params, vec![json!("inactive"), json!(7)]);
    }

    #[test]
    fn select_translates_every_operator() {
        let options = QueryOptions::new()
            .filter(QueryFilter::equals("status", "active"))
            .filter(QueryFilter::contains("display_name", "50%_off"))
            .filter(QueryFilter::greater_than("credit_limit", 10))
            .filter(QueryFilter::less_than("credit_limit", 900))
            .filter(QueryFilter::between("created_at", "2024-01-01", "2024-12-31"))
            .filter(QueryFilter::one_of("customer_code", ["C1", "C2"]))
            .order_by("display_name", SortDirection::Desc)
            .limit(10)
            .offset(20);

        let stmt = build_select("customers", &options).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM customers WHERE status = ? AND display_name LIKE ? ESCAPE '\\' \
             AND credit_limit > ? AND credit_limit < ? AND created_at BETWEEN ? AND ? \
             AND customer_code IN (?, ?) ORDER BY display_name DESC, id ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(stmt.params[1], json!("%50\\%\\_off%"));
        assert_eq!(stmt.params.len(), 8);
    }

    #[test]
    fn offset_without_limit_is_unbounded() {
        let stmt = build_select("customers", &QueryOptions::new().offset(5)).unwrap();
        assert!(stmt.sql.ends_with("ORDER BY id ASC LIMIT -1 OFFSET 5"));
    }

    #[test]
    fn oversized_limit_and_offset_are_clamped() {
        let stmt = build_select("customers", &QueryOptions::new().limit(usize::MAX).offset(usize::MAX)).unwrap();
        assert!(stmt.sql.ends_with(&format!("LIMIT {} OFFSET {}", i64::MAX, i64::MAX)), "{}", stmt.sql);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let options = QueryOptions::new().filter(QueryFilter::one_of("id", Vec::<i64>::new()));
        let stmt = build_select("customers", &options).unwrap();
        assert!(stmt.sql.contains("WHERE 0 = 1"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn malformed_between_is_rejected() {
        let filter = QueryFilter::new("amount", FilterOperator::Between, json!(5));
        assert!(matches!(
            build_count("journal_entries", &[filter]),
            Err(StorageError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn split_script_respects_literals_and_comments() {
        let script = "-- header; comment\nCREATE TABLE a (x TEXT DEFAULT 'a;b');\n\nINSERT INTO a (x) VALUES ('c');";
        let statements = split_script(script);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE TABLE a (x TEXT DEFAULT 'a;b')");
        assert_eq!(statements[1], "INSERT INTO a (x) VALUES ('c')");
    }
}
