//! Batched tabular store sink
//!
//! Projected rows queue up until `batch_size` is reached, then go to the
//! store in one insert. `finished` flushes whatever is left. A rejected
//! batch is reported as [`JanusError::BatchRejected`] after a cool-down;
//! the sink keeps accepting posts afterwards.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::{new_sink_id, Sink};
use crate::error::{JanusError, Result};
use crate::post::{Post, PostSummary};
use crate::projection::{project, Row};
use crate::store::TabularStore;

pub const DEFAULT_BATCH_SIZE: usize = 25;

pub struct TableSink {
    id: String,
    store: Arc<dyn TabularStore>,
    table: String,
    batch_size: usize,
    cooldown: Duration,
    queue: Vec<(Row, PostSummary)>,
    rows_added: u64,
}

impl TableSink {
    pub fn new(store: Arc<dyn TabularStore>, table: impl Into<String>) -> Self {
        Self {
            id: new_sink_id(),
            store,
            table: table.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            cooldown: Duration::from_secs(2),
            queue: Vec::new(),
            rows_added: 0,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Rows waiting for the next flush
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    async fn flush(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let (rows, posts): (Vec<Row>, Vec<PostSummary>) =
            std::mem::take(&mut self.queue).into_iter().unzip();

        let (status, detail) = match self.store.insert_rows(&self.table, &rows).await {
            Ok(response) => match response.affected() {
                Some(affected) => {
                    self.rows_added += affected;
                    info!("Rows added to {}: {}", self.table, affected);
                    return Ok(());
                }
                None => (response.status, response.detail()),
            },
            Err(e) => (0, e.to_string()),
        };

        warn!(
            "Batch of {} rows rejected by {} (status {}): {}. Cooling down for {:?}",
            rows.len(),
            self.store.name(),
            status,
            detail,
            self.cooldown
        );
        sleep(self.cooldown).await;
        Err(JanusError::BatchRejected {
            status,
            posts,
            detail,
        })
    }
}

#[async_trait]
impl Sink for TableSink {
    fn name(&self) -> &str {
        "table"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> String {
        format!("Table({} via {})", self.table, self.store.name())
    }

    async fn push(&mut self, post: &Post) -> Result<()> {
        self.queue.push((project(post), post.summary()));
        if self.queue.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn finished(&mut self) -> Result<()> {
        let result = self.flush().await;
        info!("Finished {}: {} rows added", self.describe(), self.rows_added);
        self.rows_added = 0;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use serde_json::json;

    fn post(n: usize) -> Post {
        Post::from_feed(json!({
            "id": n.to_string(),
            "created_time": "2017-01-01T00:00:00+0000"
        }))
        .unwrap()
    }

    fn sink(store: &MockStore) -> TableSink {
        TableSink::new(Arc::new(store.clone()), "posts").with_cooldown(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_exactly_one_flush_at_threshold() {
        let store = MockStore::new();
        let mut sink = sink(&store);
        for n in 0..DEFAULT_BATCH_SIZE {
            sink.push(&post(n)).await.unwrap();
        }
        assert_eq!(store.batch_sizes(), vec![25]);

        sink.finished().await.unwrap();
        assert_eq!(store.batch_sizes(), vec![25]);
    }

    #[tokio::test]
    async fn test_remainder_flushed_on_finish() {
        let store = MockStore::new();
        let mut sink = sink(&store);
        for n in 0..=DEFAULT_BATCH_SIZE {
            sink.push(&post(n)).await.unwrap();
        }
        assert_eq!(sink.queued(), 1);
        sink.finished().await.unwrap();
        assert_eq!(store.batch_sizes(), vec![25, 1]);

        let ids: Vec<String> = store
            .log
            .lock()
            .unwrap()
            .batches
            .iter()
            .flatten()
            .map(|r| r.post_id.clone())
            .collect();
        let expected: Vec<String> = (0..=DEFAULT_BATCH_SIZE).map(|n| n.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_rejected_batch_reports_posts_and_continues() {
        let store = MockStore::rejecting(503);
        let mut sink = sink(&store).with_batch_size(2);

        sink.push(&post(1)).await.unwrap();
        let err = sink.push(&post(2)).await.unwrap_err();
        match err {
            JanusError::BatchRejected { status, posts, detail } => {
                assert_eq!(status, 503);
                let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
                assert_eq!(ids, vec!["1", "2"]);
                assert!(detail.contains("rejected by mock"));
            }
            other => panic!("unexpected error: {}", other),
        }

        // Still accepting after a rejection
        sink.push(&post(3)).await.unwrap();
        assert_eq!(sink.queued(), 1);
    }

    #[tokio::test]
    async fn test_finish_with_empty_queue_sends_nothing() {
        let store = MockStore::new();
        let mut sink = sink(&store);
        sink.finished().await.unwrap();
        assert!(store.batch_sizes().is_empty());
    }
}
