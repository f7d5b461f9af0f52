//! Live feed source

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::info;

use super::{PostStream, Source, SourceKind, SourceQuery};
use crate::error::{JanusError, Result};
use crate::feed::FeedClient;
use crate::post::Post;

enum Cursor {
    First,
    Next(String),
}

/// Posts from one page's feed, newest first as the backend returns them
pub struct FeedSource {
    client: Arc<FeedClient>,
    page: String,
    query: SourceQuery,
}

impl FeedSource {
    pub fn new(client: Arc<FeedClient>, page: impl Into<String>) -> Self {
        Self {
            client,
            page: page.into(),
            query: SourceQuery::default(),
        }
    }

    pub fn page(&self) -> &str {
        &self.page
    }
}

#[async_trait]
impl Source for FeedSource {
    fn name(&self) -> &str {
        "feed"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    fn describe(&self) -> String {
        format!("Feed for {}", self.page)
    }

    fn identity(&self) -> String {
        self.page.clone()
    }

    fn query(&self) -> &SourceQuery {
        &self.query
    }

    fn query_mut(&mut self) -> &mut SourceQuery {
        &mut self.query
    }

    async fn authenticate(&mut self) -> Result<()> {
        self.client.authenticate()
    }

    fn posts(&self) -> PostStream<'_> {
        let client = self.client.as_ref();
        let page = self.page.as_str();
        let query = &self.query;

        let pages = stream::try_unfold(Some(Cursor::First), move |cursor| async move {
            let fetched = match cursor {
                None => return Ok(None),
                Some(Cursor::First) => client.first_page(page, query).await?,
                Some(Cursor::Next(url)) => client.next_page(&url).await?,
            };
            if fetched.posts.is_empty() {
                return Ok(None);
            }
            info!("Trawling through {} posts from {}", fetched.posts.len(), page);
            let next = fetched.next.map(Cursor::Next);
            Ok::<_, JanusError>(Some((fetched.posts, next)))
        });

        pages
            .map_ok(|payloads| stream::iter(payloads.into_iter().map(Post::from_feed)))
            .try_flatten()
            .boxed()
    }
}
