//! Disk cache source: one JSON document per post

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{PostStream, Source, SourceKind, SourceQuery};
use crate::error::{JanusError, Result};
use crate::post::Post;

pub struct CacheSource {
    dir: PathBuf,
    query: SourceQuery,
}

impl CacheSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            query: SourceQuery::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Every `*.json` file in `dir`, sorted by file name
async fn list_documents(dir: PathBuf) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(&dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    debug!("Found {} cached posts in {}", paths.len(), dir.display());
    Ok(paths)
}

async fn read_document(path: PathBuf) -> Result<Post> {
    let text = tokio::fs::read_to_string(&path).await?;
    let raw: Value = serde_json::from_str(&text).map_err(|e| {
        JanusError::MalformedPost(format!("{} is not valid JSON: {}", path.display(), e))
    })?;
    Post::from_cache(raw, path)
}

#[async_trait]
impl Source for CacheSource {
    fn name(&self) -> &str {
        "cache"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Cache
    }

    fn describe(&self) -> String {
        format!("Disk cache in {}", self.dir.display())
    }

    fn identity(&self) -> String {
        self.dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache".to_string())
    }

    fn query(&self) -> &SourceQuery {
        &self.query
    }

    fn query_mut(&mut self) -> &mut SourceQuery {
        &mut self.query
    }

    fn filters_server_side(&self) -> bool {
        false
    }

    async fn authenticate(&mut self) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(JanusError::InvalidInput(format!(
                "cache directory {} does not exist",
                self.dir.display()
            )));
        }
        Ok(())
    }

    fn posts(&self) -> PostStream<'_> {
        stream::once(list_documents(self.dir.clone()))
            .map_ok(|paths| stream::iter(paths).then(read_document))
            .try_flatten()
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn test_reads_json_documents_in_name_order() {
        let dir = TempDir::new().unwrap();
        for id in ["3", "1", "2"] {
            let doc = json!({ "id": id, "created_time": "2017-01-01T00:00:00+0000" });
            write(dir.path(), &format!("{}.json", id), &doc.to_string());
        }
        write(dir.path(), "notes.txt", "not a post");

        let source = CacheSource::new(dir.path());
        let posts: Vec<Post> = source.posts().try_collect().await.unwrap();
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(matches!(posts[0].origin, crate::post::PostOrigin::Cache { .. }));
    }

    #[tokio::test]
    async fn test_bad_document_fails_alone() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.json", r#"{"id": "a", "created_time": "2017-01-01T00:00:00+0000"}"#);
        write(dir.path(), "b.json", "{ not json");
        write(dir.path(), "c.json", r#"{"id": "c", "created_time": "2017-01-02T00:00:00+0000"}"#);

        let source = CacheSource::new(dir.path());
        let results: Vec<Result<Post>> = source.posts().collect().await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(JanusError::MalformedPost(_))));
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_identity_is_directory_name() {
        assert_eq!(CacheSource::new("./data/somepage").identity(), "somepage");
        assert_eq!(CacheSource::new("/").identity(), "cache");
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let mut source = CacheSource::new(dir.path().join("absent"));
        assert!(source.authenticate().await.is_err());

        let results: Vec<Result<Post>> = source.posts().collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_window_applied_client_side() {
        assert!(!CacheSource::new("/tmp").filters_server_side());
    }
}
