//! Post sources
//!
//! A source produces a lazy, finite stream of [`Post`]s. Each call to
//! [`Source::posts`] starts a fresh iteration from the beginning.
//!
//! Failures are reported inside the stream: an error fetching a page ends
//! the stream after one `Err`, while a post that cannot be converted yields
//! an `Err` for that post only and iteration continues.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures::stream::BoxStream;

use crate::error::Result;
use crate::post::Post;

pub mod cache;
pub mod feed;
pub mod mock;
pub mod table;

pub use cache::CacheSource;
pub use feed::FeedSource;
pub use mock::MockSource;
pub use table::TableSource;

pub type PostStream<'a> = BoxStream<'a, Result<Post>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Feed,
    Cache,
    Table,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Feed => write!(f, "feed"),
            SourceKind::Cache => write!(f, "cache"),
            SourceKind::Table => write!(f, "table"),
        }
    }
}

/// Time window and backend filter applied to a source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceQuery {
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
    /// Backend-specific filter text
    pub filter: Option<String>,
}

impl SourceQuery {
    /// Whether a creation time falls inside the window
    pub fn contains(&self, created: &DateTime<FixedOffset>) -> bool {
        let created = created.with_timezone(&Utc);
        self.since.map_or(true, |since| created >= since)
            && self.until.map_or(true, |until| created < until)
    }

    pub fn is_empty(&self) -> bool {
        self.since.is_none() && self.until.is_none() && self.filter.is_none()
    }
}

#[async_trait]
pub trait Source: Send + Sync {
    /// Source kind as used on the command line ("feed", "cache", "table")
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Human-readable name including the target
    fn describe(&self) -> String;

    /// What the posts belong to (page, table or cache directory name);
    /// the disk cache sink files posts under it
    fn identity(&self) -> String;

    fn query(&self) -> &SourceQuery;

    fn query_mut(&mut self) -> &mut SourceQuery;

    fn set_since(&mut self, since: Option<DateTime<Utc>>) {
        self.query_mut().since = since;
    }

    fn set_until(&mut self, until: Option<DateTime<Utc>>) {
        self.query_mut().until = until;
    }

    fn set_filter(&mut self, filter: Option<String>) {
        self.query_mut().filter = filter;
    }

    /// Replace the whole window and filter in one go
    fn apply_query(&mut self, query: &SourceQuery) {
        *self.query_mut() = query.clone();
    }

    /// Whether the backend applies the time window itself
    ///
    /// When `false`, the pipeline skips posts outside the window.
    fn filters_server_side(&self) -> bool {
        true
    }

    /// Verify credentials or reachability before iterating
    async fn authenticate(&mut self) -> Result<()>;

    fn posts(&self) -> PostStream<'_>;
}
