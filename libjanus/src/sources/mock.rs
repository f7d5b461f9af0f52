//! In-memory source for exercising the pipeline without a backend
//!
//! Available in all builds so integration tests and the binaries' tests can
//! drive a pipeline with canned posts.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};

use super::{PostStream, Source, SourceKind, SourceQuery};
use crate::error::{FeedError, JanusError, Result};
use crate::post::Post;

/// A canned stream item
#[derive(Debug, Clone)]
pub enum MockItem {
    Post(Post),
    /// A post that fails conversion
    Malformed(String),
}

pub struct MockSource {
    items: Vec<MockItem>,
    kind: SourceKind,
    identity: String,
    server_side: bool,
    auth_error: Option<String>,
    query: SourceQuery,
    /// Number of times authenticate has been called
    pub auth_calls: Arc<Mutex<usize>>,
}

impl MockSource {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            items: posts.into_iter().map(MockItem::Post).collect(),
            kind: SourceKind::Cache,
            identity: "mock".to_string(),
            server_side: false,
            auth_error: None,
            query: SourceQuery::default(),
            auth_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_items(items: Vec<MockItem>) -> Self {
        Self {
            items,
            ..Self::new(Vec::new())
        }
    }

    /// Pretend to be another kind of source
    pub fn as_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = identity.to_string();
        self
    }

    /// Claim the backend applies the window, so the pipeline does not
    pub fn filtering_server_side(mut self) -> Self {
        self.server_side = true;
        self
    }

    pub fn failing_auth(mut self, error: &str) -> Self {
        self.auth_error = Some(error.to_string());
        self
    }
}

#[async_trait]
impl Source for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("Mock source ({} posts)", self.items.len())
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn query(&self) -> &SourceQuery {
        &self.query
    }

    fn query_mut(&mut self) -> &mut SourceQuery {
        &mut self.query
    }

    fn filters_server_side(&self) -> bool {
        self.server_side
    }

    async fn authenticate(&mut self) -> Result<()> {
        *self.auth_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        match &self.auth_error {
            Some(error) => Err(FeedError::Authentication(error.clone()).into()),
            None => Ok(()),
        }
    }

    fn posts(&self) -> PostStream<'_> {
        stream::iter(self.items.iter().map(|item| match item {
            MockItem::Post(post) => Ok(post.clone()),
            MockItem::Malformed(reason) => Err(JanusError::MalformedPost(reason.clone())),
        }))
        .boxed()
    }
}
