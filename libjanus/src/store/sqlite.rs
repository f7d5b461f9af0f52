//! Local tabular store on SQLite
//!
//! Each table is created on first use with the canonical columns. SQLite's
//! own `rowid` serves as the row identity.

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row as _;
use std::path::Path;
use tracing::debug;

use super::{Condition, RowSet, StoreOutcome, StoreResponse, TabularStore};
use crate::error::{Result, StoreError};
use crate::projection::{Cell, Column, Row, COLUMNS};
use crate::JanusError;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file; the connection is made on first use
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Forward slashes work for SQLite URLs on every platform
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            db_path.display().to_string().replace('\\', "/")
        );
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy(&db_url)
            .map_err(StoreError::Sqlx)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_table(&self, table: &str) -> Result<String> {
        let quoted = quote_table(table)?;
        let columns: Vec<String> = COLUMNS
            .iter()
            .map(|c| {
                let kind = if c.is_count() { "INTEGER" } else { "TEXT" };
                format!("\"{}\" {}", c.name(), kind)
            })
            .collect();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quoted,
            columns.join(", ")
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Sqlx)?;
        Ok(quoted)
    }

    async fn insert_all(&self, table: &str, rows: &[Row]) -> std::result::Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for row in rows {
            let names: Vec<String> = row.columns().map(|c| format!("\"{}\"", c.name())).collect();
            let placeholders = vec!["?"; names.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for (_, cell) in &row.cells {
                query = match cell {
                    Cell::Text(s) => query.bind(s.clone()),
                    Cell::Count(n) => query.bind(*n as i64),
                };
            }
            affected += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }
}

/// Table names become quoted identifiers, so keep them plain
fn quote_table(table: &str) -> Result<String> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(JanusError::InvalidInput(format!(
            "Invalid table name '{}': use letters, digits, '_' or '-'",
            table
        )));
    }
    Ok(format!("\"{}\"", table))
}

fn failed(status: u16, err: sqlx::Error) -> StoreResponse {
    StoreResponse {
        status,
        outcome: StoreOutcome::Failed(json!({ "error": err.to_string() })),
    }
}

fn read_cell(row: &SqliteRow, index: usize, column: Column) -> std::result::Result<Value, sqlx::Error> {
    if column.is_count() {
        let value: Option<i64> = row.try_get(index)?;
        Ok(value.map(Value::from).unwrap_or(Value::Null))
    } else {
        let value: Option<String> = row.try_get(index)?;
        Ok(value.map(Value::String).unwrap_or(Value::Null))
    }
}

#[async_trait]
impl TabularStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Sqlx)?;
        Ok(())
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<StoreResponse> {
        let quoted = self.ensure_table(table).await?;
        match self.insert_all(&quoted, rows).await {
            Ok(affected) => Ok(StoreResponse {
                status: 200,
                outcome: StoreOutcome::Rows {
                    kind: "sqlite#insert".to_string(),
                    affected,
                },
            }),
            Err(e) => Ok(failed(500, e)),
        }
    }

    async fn select(
        &self,
        table: &str,
        columns: &[Column],
        conditions: &[Condition],
    ) -> Result<RowSet> {
        let quoted = self.ensure_table(table).await?;
        let names: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c.name())).collect();
        let mut sql = format!("SELECT rowid, {} FROM {}", names.join(", "), quoted);

        let mut binds = Vec::new();
        let clauses: Vec<String> = conditions
            .iter()
            .map(|condition| match condition {
                Condition::DateAtLeast(bound) => {
                    binds.push(Condition::date_literal(bound));
                    "\"Date\" >= ?".to_string()
                }
                Condition::DateBefore(bound) => {
                    binds.push(Condition::date_literal(bound));
                    "\"Date\" < ?".to_string()
                }
                Condition::Raw(raw) => format!("({})", raw),
            })
            .collect();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY \"Date\" ASC");
        debug!("generated SELECT sql: {}", sql);

        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let fetched = query
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Sqlx)?;

        let mut rows = Vec::with_capacity(fetched.len());
        for record in &fetched {
            let row_id: i64 = record.try_get(0).map_err(StoreError::Sqlx)?;
            let mut values = vec![Value::String(row_id.to_string())];
            for (offset, column) in columns.iter().enumerate() {
                values.push(read_cell(record, offset + 1, *column).map_err(StoreError::Sqlx)?);
            }
            rows.push(values);
        }

        let mut headers = vec!["ROWID".to_string()];
        headers.extend(columns.iter().map(|c| c.name().to_string()));
        Ok(RowSet {
            columns: headers,
            rows,
        })
    }

    async fn update_row(&self, table: &str, row_id: &str, row: &Row) -> Result<StoreResponse> {
        let quoted = self.ensure_table(table).await?;
        let assignments: Vec<String> = row
            .columns()
            .map(|c| format!("\"{}\" = ?", c.name()))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE rowid = ?",
            quoted,
            assignments.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, cell) in &row.cells {
            query = match cell {
                Cell::Text(s) => query.bind(s.clone()),
                Cell::Count(n) => query.bind(*n as i64),
            };
        }
        let row_id_num: i64 = row_id.parse().map_err(|_| {
            JanusError::InvalidInput(format!("ROWID must be numeric, got '{}'", row_id))
        })?;
        query = query.bind(row_id_num);

        match query.execute(&self.pool).await {
            Ok(done) if done.rows_affected() == 0 => Ok(StoreResponse {
                status: 404,
                outcome: StoreOutcome::Failed(json!({
                    "error": format!("no row with ROWID {} in {}", row_id, table)
                })),
            }),
            Ok(done) => Ok(StoreResponse {
                status: 200,
                outcome: StoreOutcome::Rows {
                    kind: "sqlite#update".to_string(),
                    affected: done.rows_affected(),
                },
            }),
            Err(e) => Ok(failed(500, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::Post;
    use crate::projection::{project, project_columns};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn post(id: &str, created: &str, likes: usize) -> Post {
        let likes: Vec<Value> = (0..likes).map(|_| json!({})).collect();
        Post::from_feed(json!({
            "id": id,
            "created_time": created,
            "from": { "name": "O'Neil & Co" },
            "message": "hello\nworld",
            "likes": { "data": likes },
        }))
        .unwrap()
    }

    fn store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(&dir.path().join("nested").join("tables.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_insert_then_select_round_trip() {
        let (_dir, store) = store();
        let rows = vec![
            project(&post("1", "2017-01-01T10:00:00+0000", 2)),
            project(&post("2", "2017-01-02T10:00:00+0000", 0)),
        ];

        let response = store.insert_rows("posts", &rows).await.unwrap();
        assert_eq!(response.affected(), Some(2));

        let set = store.select("posts", &COLUMNS, &[]).await.unwrap();
        assert_eq!(set.columns[0], "ROWID");
        assert_eq!(set.rows.len(), 2);

        let first = Post::from_row("posts", &set.columns, &set.rows[0]).unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(first.author, "O'Neil & Co");
        assert_eq!(first.message, "hello world");
        assert_eq!(first.like_count, 2);
        assert!(first.row_id().is_some());
    }

    #[tokio::test]
    async fn test_select_applies_date_conditions() {
        let (_dir, store) = store();
        let rows: Vec<Row> = ["2017-01-01", "2017-01-02", "2017-01-03"]
            .iter()
            .enumerate()
            .map(|(i, day)| project(&post(&i.to_string(), &format!("{}T12:00:00+0000", day), 0)))
            .collect();
        store.insert_rows("posts", &rows).await.unwrap();

        let since = Utc.with_ymd_and_hms(2017, 1, 2, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2017, 1, 3, 0, 0, 0).unwrap();
        let set = store
            .select(
                "posts",
                &[Column::Id],
                &[Condition::DateAtLeast(since), Condition::DateBefore(until)],
            )
            .await
            .unwrap();

        assert_eq!(set.rows.len(), 1);
        assert_eq!(set.rows[0][1], json!("1"));
    }

    #[tokio::test]
    async fn test_update_row_by_rowid() {
        let (_dir, store) = store();
        store
            .insert_rows("posts", &[project(&post("1", "2017-01-01T10:00:00+0000", 0))])
            .await
            .unwrap();
        let set = store.select("posts", &[Column::Id], &[]).await.unwrap();
        let row_id = set.rows[0][0].as_str().unwrap().to_string();

        let fresh = post("1", "2017-01-01T10:00:00+0000", 9);
        let response = store
            .update_row("posts", &row_id, &project_columns(&fresh, &[Column::Likes]))
            .await
            .unwrap();
        assert!(response.is_success());

        let set = store.select("posts", &[Column::Likes], &[]).await.unwrap();
        assert_eq!(set.rows[0][1], json!(9));
    }

    #[tokio::test]
    async fn test_update_missing_row_reports_failure() {
        let (_dir, store) = store();
        let response = store
            .update_row(
                "posts",
                "42",
                &project_columns(&post("1", "2017-01-01T10:00:00+0000", 1), &[Column::Likes]),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_invalid_table_name_rejected() {
        let (_dir, store) = store();
        let err = store.select("posts; DROP", &[Column::Id], &[]).await.unwrap_err();
        assert!(matches!(err, JanusError::InvalidInput(_)));
    }
}
