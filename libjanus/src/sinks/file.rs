//! Disk cache sink: writes each post as `{dir}/{source}/{id}.json`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{new_sink_id, Sink};
use crate::error::{JanusError, Result};
use crate::post::Post;

pub struct FileSink {
    id: String,
    dir: PathBuf,
    /// `dir` joined with the current source identity
    target: PathBuf,
}

/// Keep a name to one path component
fn component(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    match name.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => name,
    }
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            id: new_sink_id(),
            target: dir.clone(),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where a post with this id is written during the current pull
    pub fn path_for(&self, post_id: &str) -> PathBuf {
        self.target.join(format!("{}.json", component(post_id)))
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> String {
        format!("File({})", self.dir.display())
    }

    fn begin(&mut self, source: &str) {
        self.target = self.dir.join(component(source));
    }

    async fn push(&mut self, post: &Post) -> Result<()> {
        tokio::fs::create_dir_all(&self.target).await?;

        // Keep the backend's own document when there is one
        let document = match post.raw() {
            Some(raw) => raw.clone(),
            None => post.to_feed_json(),
        };
        let bytes = serde_json::to_vec(&document).map_err(|e| {
            JanusError::MalformedPost(format!("post {} cannot be serialized: {}", post.id, e))
        })?;

        let path = self.path_for(&post.id);
        tokio::fs::write(&path, bytes).await?;
        debug!("Cached post {} at {}", post.id, path.display());
        Ok(())
    }

    async fn finished(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_raw_document_under_source() {
        let dir = TempDir::new().unwrap();
        let raw = json!({ "id": "12_34", "created_time": "2017-01-01T00:00:00+0000", "extra": 1 });
        let post = Post::from_feed(raw.clone()).unwrap();

        let mut sink = FileSink::new(dir.path().join("cache"));
        sink.begin("somepage");
        sink.push(&post).await.unwrap();
        sink.finished().await.unwrap();

        let path = dir.path().join("cache/somepage/12_34.json");
        let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written, raw);
    }

    #[test]
    fn test_path_components_sanitized() {
        let mut sink = FileSink::new("/tmp/cache");
        assert_eq!(sink.path_for("a/b"), PathBuf::from("/tmp/cache/a_b.json"));

        sink.begin("..");
        assert_eq!(sink.path_for("1"), PathBuf::from("/tmp/cache/_/1.json"));
        sink.begin("pages/one");
        assert_eq!(sink.path_for("1"), PathBuf::from("/tmp/cache/pages_one/1.json"));
    }
}
