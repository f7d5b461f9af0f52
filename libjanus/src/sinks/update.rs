//! Update sink: refresh stored rows with live counts
//!
//! For each post read from a tabular store, fetch the live post from the
//! feed backend and overwrite the chosen columns of its row.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{new_sink_id, Sink};
use crate::error::{JanusError, Result, StoreError};
use crate::feed::FeedClient;
use crate::post::Post;
use crate::projection::{project_columns, Column, DEFAULT_UPDATE_COLUMNS};
use crate::sources::SourceKind;
use crate::store::TabularStore;

pub struct UpdateSink {
    id: String,
    feed: Arc<FeedClient>,
    store: Arc<dyn TabularStore>,
    table: String,
    columns: Vec<Column>,
    updated: u64,
    failed: u64,
}

impl UpdateSink {
    pub fn new(
        feed: Arc<FeedClient>,
        store: Arc<dyn TabularStore>,
        table: impl Into<String>,
        columns: Vec<Column>,
    ) -> Self {
        let columns = if columns.is_empty() {
            DEFAULT_UPDATE_COLUMNS.to_vec()
        } else {
            columns
        };
        Self {
            id: new_sink_id(),
            feed,
            store,
            table: table.into(),
            columns,
            updated: 0,
            failed: 0,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn refresh(&self, post: &Post) -> Result<()> {
        let row_id = post.row_id().ok_or_else(|| {
            JanusError::InvalidInput(format!(
                "post {} has no ROWID; the update sink needs a table source",
                post.id
            ))
        })?;

        self.feed.authenticate()?;
        let live = Post::from_feed(self.feed.fetch_post(&post.id).await?)?;
        let row = project_columns(&live, &self.columns);

        let response = self.store.update_row(&self.table, row_id, &row).await?;
        if !response.is_success() {
            return Err(StoreError::Query {
                status: response.status,
                detail: response.detail(),
            }
            .into());
        }
        debug!("Updated row {} (post {}) in {}", row_id, post.id, self.table);
        Ok(())
    }
}

/// Parse column names for the update sink
pub fn parse_columns(names: &[String]) -> Result<Vec<Column>> {
    names
        .iter()
        .map(|name| {
            Column::from_name(name)
                .ok_or_else(|| JanusError::InvalidInput(format!("unknown column '{}'", name)))
        })
        .collect()
}

#[async_trait]
impl Sink for UpdateSink {
    fn name(&self) -> &str {
        "update"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name()).collect();
        format!("Update({}: {})", self.table, names.join(", "))
    }

    async fn push(&mut self, post: &Post) -> Result<()> {
        match self.refresh(post).await {
            Ok(()) => {
                self.updated += 1;
                Ok(())
            }
            Err(e) => {
                self.failed += 1;
                warn!("Could not update post {}: {}", post.id, e);
                Err(e)
            }
        }
    }

    async fn finished(&mut self) -> Result<()> {
        info!(
            "Updated {} rows in {} ({} failed)",
            self.updated, self.table, self.failed
        );
        self.updated = 0;
        self.failed = 0;
        Ok(())
    }

    fn accepts(&self, kind: SourceKind) -> bool {
        kind == SourceKind::Table
    }
}
