//! Tabular store source

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::info;

use super::{PostStream, Source, SourceKind, SourceQuery};
use crate::error::{JanusError, Result};
use crate::post::Post;
use crate::projection::COLUMNS;
use crate::store::{Condition, TabularStore};

pub struct TableSource {
    store: Arc<dyn TabularStore>,
    table: String,
    query: SourceQuery,
}

impl TableSource {
    pub fn new(store: Arc<dyn TabularStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            query: SourceQuery::default(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Select conditions for the current window and filter
    pub fn conditions(&self) -> Vec<Condition> {
        let mut conditions = Vec::new();
        if let Some(since) = self.query.since {
            conditions.push(Condition::DateAtLeast(since));
        }
        if let Some(until) = self.query.until {
            conditions.push(Condition::DateBefore(until));
        }
        if let Some(filter) = self.query.filter.as_deref() {
            if !filter.trim().is_empty() {
                conditions.push(Condition::Raw(filter.trim().to_string()));
            }
        }
        conditions
    }
}

#[async_trait]
impl Source for TableSource {
    fn name(&self) -> &str {
        "table"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Table
    }

    fn describe(&self) -> String {
        format!("Table {} ({})", self.table, self.store.name())
    }

    fn identity(&self) -> String {
        self.table.clone()
    }

    fn query(&self) -> &SourceQuery {
        &self.query
    }

    fn query_mut(&mut self) -> &mut SourceQuery {
        &mut self.query
    }

    async fn authenticate(&mut self) -> Result<()> {
        self.store.check().await
    }

    fn posts(&self) -> PostStream<'_> {
        let table = self.table.as_str();
        let conditions = self.conditions();
        let fetch = async move {
            let set = self.store.select(table, &COLUMNS, &conditions).await?;
            info!("Selected {} rows from {}", set.rows.len(), table);
            Ok::<_, JanusError>(set)
        };

        stream::once(fetch)
            .map_ok(move |set| {
                let headers = set.columns;
                stream::iter(
                    set.rows
                        .into_iter()
                        .map(move |row| Post::from_row(table, &headers, &row)),
                )
            })
            .try_flatten()
            .boxed()
    }
}
