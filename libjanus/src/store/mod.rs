//! Tabular store backends
//!
//! A tabular store keeps one row per post under the canonical columns from
//! [`crate::projection`]. Writes report an HTTP-style status plus either a
//! rows-written count or the backend's error payload; the table sink decides
//! what a failed batch means for the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::projection::{Column, Row, TABLE_TIME_FORMAT};

pub mod http;
pub mod mock;
pub mod sqlite;

pub use http::HttpStore;
pub use mock::MockStore;
pub use sqlite::SqliteStore;

/// A row filter understood by every backend
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `Date >= bound`
    DateAtLeast(DateTime<Utc>),
    /// `Date < bound`
    DateBefore(DateTime<Utc>),
    /// A backend-specific predicate, passed through untouched
    Raw(String),
}

impl Condition {
    /// The bound formatted the way the `Date` column stores it
    pub fn date_literal(bound: &DateTime<Utc>) -> String {
        bound.format(TABLE_TIME_FORMAT).to_string()
    }
}

/// Column headers plus row tuples, as returned by a select
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    /// The backend accepted the write
    Rows { kind: String, affected: u64 },
    /// Anything else the backend sent back
    Failed(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreResponse {
    pub status: u16,
    pub outcome: StoreOutcome,
}

impl StoreResponse {
    pub fn is_success(&self) -> bool {
        self.status <= 201 && matches!(self.outcome, StoreOutcome::Rows { .. })
    }

    /// Rows written, when the write succeeded
    pub fn affected(&self) -> Option<u64> {
        match (&self.outcome, self.is_success()) {
            (StoreOutcome::Rows { affected, .. }, true) => Some(*affected),
            _ => None,
        }
    }

    /// Error payload as text, for failure reports
    pub fn detail(&self) -> String {
        match &self.outcome {
            StoreOutcome::Rows { kind, affected } => format!("{} ({} rows)", kind, affected),
            StoreOutcome::Failed(Value::String(s)) => s.clone(),
            StoreOutcome::Failed(payload) => payload.to_string(),
        }
    }
}

/// Backend collaborator for the table sink, table source and update sink
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Backend name for logs ("http", "sqlite")
    fn name(&self) -> &str;

    /// Verify credentials / reachability before a pull
    async fn check(&self) -> Result<()>;

    /// Insert several rows in one request
    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<StoreResponse>;

    /// Select `ROWID` plus `columns`, filtered by every condition
    async fn select(
        &self,
        table: &str,
        columns: &[Column],
        conditions: &[Condition],
    ) -> Result<RowSet>;

    /// Overwrite the row's cells for the columns present in `row`
    async fn update_row(&self, table: &str, row_id: &str, row: &Row) -> Result<StoreResponse>;
}
