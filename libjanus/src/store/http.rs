//! SQL-over-HTTP tabular store
//!
//! Talks to a hosted table service that takes SQL statements on a single
//! `query` endpoint: writes are form-encoded POSTs (`sql=...`, inserts
//! joined with `; `), selects are GETs with the statement in the query
//! string. Successful responses look like
//! `{"kind": "...#sqlresponse", "columns": [...], "rows": [[...]]}`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{Condition, RowSet, StoreOutcome, StoreResponse, TabularStore};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::projection::{Cell, Column, Row};

/// Upper bound for the reachability check made before a pull
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpStore {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(StoreError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn query_url(&self) -> String {
        format!("{}/query", self.base_url)
    }

    async fn post_sql(&self, sql: &str) -> Result<StoreResponse> {
        debug!("sending statement to {}: {}", self.query_url(), sql);
        let mut request = self.client.post(self.query_url()).form(&[("sql", sql)]);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(StoreError::Http)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(StoreError::Http)?;
        Ok(interpret_write(status, &body))
    }
}

/// Turn a write response into a status/outcome pair
fn interpret_write(status: u16, body: &str) -> StoreResponse {
    let payload: Value =
        serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()));

    let kind = payload
        .get("kind")
        .and_then(Value::as_str)
        .filter(|k| k.ends_with("sqlresponse"))
        .map(str::to_string);

    let outcome = match kind {
        Some(kind) if status <= 201 => StoreOutcome::Rows {
            kind,
            affected: payload
                .get("rows")
                .and_then(Value::as_array)
                .map(|rows| rows.len() as u64)
                .unwrap_or(0),
        },
        _ => StoreOutcome::Failed(payload),
    };

    StoreResponse { status, outcome }
}

/// Quote a string literal, escaping single quotes with a backslash
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn literal(cell: &Cell) -> String {
    match cell {
        Cell::Text(s) => quote(s),
        Cell::Count(n) => n.to_string(),
    }
}

pub(crate) fn insert_sql(table: &str, rows: &[Row]) -> String {
    rows.iter()
        .map(|row| {
            let names: Vec<String> = row.columns().map(|c| quote(c.name())).collect();
            let values: Vec<String> = row.cells.iter().map(|(_, v)| literal(v)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                values.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) fn select_sql(table: &str, columns: &[Column], conditions: &[Condition]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote(c.name())).collect();
    let mut sql = format!("SELECT ROWID, {} FROM {}", names.join(", "), table);

    let clauses: Vec<String> = conditions
        .iter()
        .map(|condition| match condition {
            Condition::DateAtLeast(bound) => format!(
                "{} >= {}",
                quote(Column::Date.name()),
                quote(&Condition::date_literal(bound))
            ),
            Condition::DateBefore(bound) => format!(
                "{} < {}",
                quote(Column::Date.name()),
                quote(&Condition::date_literal(bound))
            ),
            Condition::Raw(raw) => raw.clone(),
        })
        .collect();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql
}

pub(crate) fn update_sql(table: &str, row_id: &str, row: &Row) -> String {
    let assignments: Vec<String> = row
        .cells
        .iter()
        .map(|(column, value)| format!("{} = {}", quote(column.name()), literal(value)))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE ROWID = {}",
        table,
        assignments.join(", "),
        quote(row_id)
    )
}

#[async_trait]
impl TabularStore for HttpStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn check(&self) -> Result<()> {
        if self.access_token.is_none() {
            return Err(StoreError::Authentication(format!(
                "no access token for {}. Set store.access_token or {}",
                self.base_url,
                crate::config::STORE_TOKEN_ENV
            ))
            .into());
        }

        let mut request = self
            .client
            .get(self.query_url())
            .query(&[("sql", "SHOW TABLES")])
            .timeout(CHECK_TIMEOUT);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(StoreError::Http)?;
        let status = response.status();
        debug!("{} answered SHOW TABLES with {}", self.base_url, status);
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(StoreError::Authentication(format!(
                "{} refused the access token: {}",
                self.base_url, detail
            ))
            .into()),
            code => Err(StoreError::Query {
                status: code,
                detail,
            }
            .into()),
        }
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<StoreResponse> {
        if rows.is_empty() {
            return Ok(StoreResponse {
                status: 200,
                outcome: StoreOutcome::Rows {
                    kind: "empty".to_string(),
                    affected: 0,
                },
            });
        }
        self.post_sql(&insert_sql(table, rows)).await
    }

    async fn select(
        &self,
        table: &str,
        columns: &[Column],
        conditions: &[Condition],
    ) -> Result<RowSet> {
        let sql = select_sql(table, columns, conditions);
        debug!("generated SELECT sql: {}", sql);

        let mut request = self.client.get(self.query_url()).query(&[("sql", sql.as_str())]);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(StoreError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StoreError::Query {
                status: status.as_u16(),
                detail,
            }
            .into());
        }

        let payload: Value = response.json().await.map_err(StoreError::Http)?;
        let columns = payload
            .get("columns")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::Response("select response has no columns".to_string()))?
            .iter()
            .map(|c| c.as_str().unwrap_or_default().to_string())
            .collect();
        // An empty result has no "rows" key at all
        let rows = payload
            .get("rows")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .map(|r| r.as_array().cloned().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();

        Ok(RowSet { columns, rows })
    }

    async fn update_row(&self, table: &str, row_id: &str, row: &Row) -> Result<StoreResponse> {
        self.post_sql(&update_sql(table, row_id, row)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(id: &str) -> Row {
        Row {
            post_id: id.to_string(),
            cells: vec![
                (Column::Id, Cell::Text(id.to_string())),
                (Column::Message, Cell::Text("it's".to_string())),
                (Column::Likes, Cell::Count(4)),
            ],
        }
    }

    #[test]
    fn test_insert_sql_joins_statements() {
        let sql = insert_sql("1abc", &[row("1"), row("2")]);
        assert_eq!(
            sql,
            "INSERT INTO 1abc ('ID', 'Message', 'Likes') VALUES ('1', 'it\\'s', 4); \
             INSERT INTO 1abc ('ID', 'Message', 'Likes') VALUES ('2', 'it\\'s', 4)"
        );
    }

    #[test]
    fn test_select_sql_with_conditions() {
        let since = Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap();
        let sql = select_sql(
            "1abc",
            &[Column::Id, Column::Date],
            &[
                Condition::DateAtLeast(since),
                Condition::Raw("'Likes' > 10".to_string()),
            ],
        );
        assert_eq!(
            sql,
            "SELECT ROWID, 'ID', 'Date' FROM 1abc WHERE 'Date' >= '2017-01-01 00:00:00' AND 'Likes' > 10"
        );
    }

    #[test]
    fn test_update_sql() {
        let sql = update_sql("1abc", "17", &row("1"));
        assert_eq!(
            sql,
            "UPDATE 1abc SET 'ID' = '1', 'Message' = 'it\\'s', 'Likes' = 4 WHERE ROWID = '17'"
        );
    }

    #[test]
    fn test_interpret_write() {
        let ok = interpret_write(
            200,
            r#"{"kind": "fusiontables#sqlresponse", "columns": ["rowid"], "rows": [["1"], ["2"]]}"#,
        );
        assert_eq!(ok.affected(), Some(2));

        let rejected = interpret_write(400, r#"{"error": {"code": 400, "message": "bad"}}"#);
        assert!(!rejected.is_success());
        assert!(rejected.detail().contains("bad"));

        let garbage = interpret_write(502, "<html>Bad Gateway</html>");
        assert_eq!(garbage.detail(), "<html>Bad Gateway</html>");
    }
}
