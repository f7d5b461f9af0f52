//! Recording store for tests
//!
//! Keeps every insert batch and update in memory and can be told to reject
//! writes with a given status.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};

use super::{Condition, RowSet, StoreOutcome, StoreResponse, TabularStore};
use crate::error::Result;
use crate::projection::{Column, Row};

#[derive(Debug, Default)]
pub struct MockStoreLog {
    /// Each insert call's rows
    pub batches: Vec<Vec<Row>>,
    /// (row id, row) per update call
    pub updates: Vec<(String, Row)>,
}

#[derive(Clone, Default)]
pub struct MockStore {
    pub log: Arc<Mutex<MockStoreLog>>,
    reject_status: Option<u16>,
    rows: RowSet,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every write with this status and an error payload
    pub fn rejecting(status: u16) -> Self {
        Self {
            reject_status: Some(status),
            ..Self::default()
        }
    }

    /// Rows returned by every select
    pub fn with_rows(mut self, rows: RowSet) -> Self {
        self.rows = rows;
        self
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batches.iter().map(Vec::len).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockStoreLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn respond(&self, affected: u64) -> StoreResponse {
        match self.reject_status {
            Some(status) => StoreResponse {
                status,
                outcome: StoreOutcome::Failed(json!({ "error": { "code": status, "message": "rejected by mock" } })),
            },
            None => StoreResponse {
                status: 200,
                outcome: StoreOutcome::Rows {
                    kind: "mock#sqlresponse".to_string(),
                    affected,
                },
            },
        }
    }
}

#[async_trait]
impl TabularStore for MockStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn check(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_rows(&self, _table: &str, rows: &[Row]) -> Result<StoreResponse> {
        self.lock().batches.push(rows.to_vec());
        Ok(self.respond(rows.len() as u64))
    }

    async fn select(
        &self,
        _table: &str,
        _columns: &[Column],
        _conditions: &[Condition],
    ) -> Result<RowSet> {
        Ok(self.rows.clone())
    }

    async fn update_row(&self, _table: &str, row_id: &str, row: &Row) -> Result<StoreResponse> {
        self.lock().updates.push((row_id.to_string(), row.clone()));
        Ok(self.respond(1))
    }
}
