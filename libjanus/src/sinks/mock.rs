//! Recording sink for exercising the pipeline
//!
//! Available in all builds so integration tests can verify fan-out, error
//! recording and the `finished` contract without touching disk or network.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{new_sink_id, Sink};
use crate::error::{JanusError, Result};
use crate::post::Post;
use crate::sources::SourceKind;

/// Everything a mock sink saw
#[derive(Debug, Default, Clone)]
pub struct MockSinkLog {
    pub pushed: Vec<String>,
    pub finished_calls: usize,
}

pub struct MockSink {
    id: String,
    label: String,
    fail_on: Option<usize>,
    only: Option<SourceKind>,
    pushes: usize,
    pub log: Arc<Mutex<MockSinkLog>>,
}

impl MockSink {
    pub fn new(label: &str) -> Self {
        Self {
            id: new_sink_id(),
            label: label.to_string(),
            fail_on: None,
            only: None,
            pushes: 0,
            log: Arc::new(Mutex::new(MockSinkLog::default())),
        }
    }

    /// Fail the n-th push of each pull (1-based)
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Only accept posts from one kind of source
    pub fn accepting_only(mut self, kind: SourceKind) -> Self {
        self.only = Some(kind);
        self
    }

    /// Snapshot of what the sink has seen so far
    pub fn snapshot(log: &Arc<Mutex<MockSinkLog>>) -> MockSinkLog {
        log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Sink for MockSink {
    fn name(&self) -> &str {
        "mock"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> String {
        format!("Mock({})", self.label)
    }

    async fn push(&mut self, post: &Post) -> Result<()> {
        self.pushes += 1;
        if self.fail_on == Some(self.pushes) {
            return Err(JanusError::InvalidInput(format!(
                "{} refused post {}",
                self.label, post.id
            )));
        }
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pushed
            .push(post.id.clone());
        Ok(())
    }

    async fn finished(&mut self) -> Result<()> {
        self.pushes = 0;
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .finished_calls += 1;
        Ok(())
    }

    fn accepts(&self, kind: SourceKind) -> bool {
        self.only.map_or(true, |only| only == kind)
    }
}
