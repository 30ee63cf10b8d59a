/// SQLite table-backed target adapter
///
/// Exposes selected columns of a host-owned table as readable fields and a
/// smaller allowlist as writable fields, optionally restricted to a fixed set of
/// values (e.g. `status` may only become one of the known application states).

use crate::{error::TargetError, targets::TargetAdapter};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    Row, TypeInfo, ValueRef,
};
use std::collections::HashMap;

/// Target adapter over one SQLite table
#[derive(Debug, Clone)]
pub struct TableTarget {
    pool: SqlitePool,
    table: String,
    id_column: String,
    readable: Vec<String>,
    /// Writable field -> allowed values (None = any value)
    writable: HashMap<String, Option<Vec<Value>>>,
}

impl TableTarget {
    /// Create an adapter for `table`, addressing rows by `id_column`
    pub fn new(pool: SqlitePool, table: &str, id_column: &str) -> Result<Self, TargetError> {
        for name in [table, id_column] {
            if !is_safe_identifier(name) {
                return Err(TargetError::Backend(format!("invalid identifier: {name}")));
            }
        }

        Ok(Self {
            pool,
            table: table.to_string(),
            id_column: id_column.to_string(),
            readable: Vec::new(),
            writable: HashMap::new(),
        })
    }

    /// Allow reading the given columns
    pub fn readable(mut self, columns: &[&str]) -> Self {
        self.readable.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Allow writing `field`, optionally only with one of `allowed` values
    pub fn writable(mut self, field: &str, allowed: Option<Vec<Value>>) -> Self {
        self.writable.insert(field.to_string(), allowed);
        self
    }

    fn can_read(&self, field: &str) -> bool {
        self.readable.iter().any(|c| c == field) || self.writable.contains_key(field)
    }
}

#[async_trait]
impl TargetAdapter for TableTarget {
    async fn read_field(&self, target_id: &str, field: &str) -> Result<Option<Value>, TargetError> {
        if !self.can_read(field) || !is_safe_identifier(field) {
            return Err(TargetError::UnreadableField(field.to_string()));
        }

        let query = format!(
            "SELECT \"{}\" FROM \"{}\" WHERE \"{}\" = ?",
            field, self.table, self.id_column
        );
        tracing::debug!("📖 Target read: {}", query);

        let row = sqlx::query(&query)
            .bind(target_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TargetError::Backend(e.to_string()))?
            .ok_or_else(|| TargetError::NotFound {
                target_type: self.table.clone(),
                target_id: target_id.to_string(),
            })?;

        column_to_json(&row, 0)
    }

    async fn write_field(&self, target_id: &str, field: &str, value: &Value) -> Result<(), TargetError> {
        let allowed = self
            .writable
            .get(field)
            .filter(|_| is_safe_identifier(field))
            .ok_or_else(|| TargetError::UnwritableField(field.to_string()))?;

        if let Some(allowed) = allowed {
            if !allowed.contains(value) {
                return Err(TargetError::RejectedValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }

        let query = format!(
            "UPDATE \"{}\" SET \"{}\" = ? WHERE \"{}\" = ?",
            self.table, field, self.id_column
        );
        tracing::debug!("📝 Target write: {} ({} = {})", query, field, value);

        let mut query_builder = sqlx::query(&query);
        query_builder = match value {
            Value::String(s) => query_builder.bind(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query_builder.bind(i)
                } else if let Some(f) = n.as_f64() {
                    query_builder.bind(f)
                } else {
                    query_builder.bind(n.to_string())
                }
            }
            Value::Bool(b) => query_builder.bind(*b),
            Value::Null => query_builder.bind(None::<String>),
            other => query_builder.bind(other.to_string()),
        };

        let result = query_builder
            .bind(target_id)
            .execute(&self.pool)
            .await
            .map_err(|e| TargetError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(TargetError::NotFound {
                target_type: self.table.clone(),
                target_id: target_id.to_string(),
            });
        }

        Ok(())
    }
}

/// Convert one SQLite column into JSON based on the stored value's type
fn column_to_json(row: &SqliteRow, index: usize) -> Result<Option<Value>, TargetError> {
    let backend = |e: sqlx::Error| TargetError::Backend(e.to_string());

    let raw = row.try_get_raw(index).map_err(backend)?;
    if raw.is_null() {
        return Ok(None);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => json!(row.try_get::<i64, _>(index).map_err(backend)?),
        "REAL" | "NUMERIC" => json!(row.try_get::<f64, _>(index).map_err(backend)?),
        "BLOB" => return Err(TargetError::Backend("blob columns are not supported".to_string())),
        _ => json!(row.try_get::<String, _>(index).map_err(backend)?),
    };

    Ok(Some(value))
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    async fn applications() -> (tempfile::TempDir, TableTarget) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_file(&dir.path().join("targets.db"), 1).await.unwrap();
        sqlx::query(
            "CREATE TABLE loan_applications (id TEXT PRIMARY KEY, status TEXT, amount INTEGER, rate REAL, notes TEXT)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query("INSERT INTO loan_applications VALUES ('app-1', 'submitted', 250000, 4.5, NULL)")
            .execute(db.pool())
            .await
            .unwrap();

        let target = TableTarget::new(db.pool().clone(), "loan_applications", "id")
            .unwrap()
            .readable(&["amount", "rate", "notes"])
            .writable(
                "status",
                Some(vec![json!("submitted"), json!("in_review"), json!("approved")]),
            );
        (dir, target)
    }

    #[tokio::test]
    async fn reads_typed_columns() {
        let (_dir, target) = applications().await;

        assert_eq!(target.read_field("app-1", "status").await.unwrap(), Some(json!("submitted")));
        assert_eq!(target.read_field("app-1", "amount").await.unwrap(), Some(json!(250000)));
        assert_eq!(target.read_field("app-1", "rate").await.unwrap(), Some(json!(4.5)));
        assert_eq!(target.read_field("app-1", "notes").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_unknown_fields_and_rows() {
        let (_dir, target) = applications().await;

        assert!(matches!(
            target.read_field("app-1", "ssn").await,
            Err(TargetError::UnreadableField(_))
        ));
        assert!(matches!(
            target.read_field("app-404", "status").await,
            Err(TargetError::NotFound { .. })
        ));
        assert!(matches!(
            target.write_field("app-404", "status", &json!("approved")).await,
            Err(TargetError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn write_respects_allowlist() {
        let (_dir, target) = applications().await;

        target.write_field("app-1", "status", &json!("approved")).await.unwrap();
        assert_eq!(target.read_field("app-1", "status").await.unwrap(), Some(json!("approved")));

        assert!(matches!(
            target.write_field("app-1", "status", &json!("funded")).await,
            Err(TargetError::RejectedValue { .. })
        ));
        assert!(matches!(
            target.write_field("app-1", "amount", &json!(1)).await,
            Err(TargetError::UnwritableField(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        assert!(TableTarget::new(pool, "apps; DROP TABLE x", "id").is_err());
    }
}
