//! Per-process session: configuration plus shared backends
//!
//! Backends are created on first use so that a session that only reads a
//! disk cache never needs feed or store credentials.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{expand_path, Config, StoreBackend};
use crate::error::Result;
use crate::feed::FeedClient;
use crate::store::{HttpStore, SqliteStore, TabularStore};

pub struct Session {
    config: Config,
    feed: Option<Arc<FeedClient>>,
    store: Option<Arc<dyn TabularStore>>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            feed: None,
            store: None,
        }
    }

    /// Use this store instead of the configured backend
    pub fn with_store(mut self, store: Arc<dyn TabularStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this feed client instead of one built from configuration
    pub fn with_feed_client(mut self, feed: Arc<FeedClient>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn feed_client(&mut self) -> Result<Arc<FeedClient>> {
        if let Some(feed) = &self.feed {
            return Ok(Arc::clone(feed));
        }
        debug!("Creating feed client for {}", self.config.feed.base_url);
        let feed = Arc::new(FeedClient::new(&self.config.feed)?);
        self.feed = Some(Arc::clone(&feed));
        Ok(feed)
    }

    pub fn store(&mut self) -> Result<Arc<dyn TabularStore>> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        let store: Arc<dyn TabularStore> = match self.config.store.backend {
            StoreBackend::Http => Arc::new(HttpStore::new(&self.config.store)?),
            StoreBackend::Sqlite => {
                let path = expand_path(&self.config.store.sqlite_path);
                debug!("Opening SQLite store at {}", path.display());
                Arc::new(SqliteStore::new(&path)?)
            }
        };
        self.store = Some(Arc::clone(&store));
        Ok(store)
    }

    pub fn batch_size(&self) -> usize {
        self.config.pipeline.batch_size
    }

    pub fn cooldown(&self) -> Result<Duration> {
        self.config.pipeline.cooldown()
    }

    /// Default directory for the disk cache source and sink
    pub fn cache_dir(&self) -> PathBuf {
        expand_path(&self.config.pipeline.cache_dir)
    }

    pub fn stats_dir(&self) -> Option<PathBuf> {
        self.config.pipeline.stats_dir.as_deref().map(expand_path)
    }
}
