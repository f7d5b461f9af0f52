//! Pipeline controller
//!
//! Owns at most one source and an ordered list of sinks. A pull streams
//! every post from the source and hands it to each sink in turn; failures
//! are recorded per post and per sink so that one bad post or one broken
//! sink never stops the run. Every sink gets exactly one `finished` call per
//! pull, also when the pull is cancelled.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{JanusError, Result};
use crate::post::{Post, PostSummary};
use crate::sinks::{Sink, SinkInfo};
use crate::sources::{Source, SourceQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NoSource,
    SourceBound,
    Pulling,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::NoSource => write!(f, "no source"),
            PipelineState::SourceBound => write!(f, "source bound"),
            PipelineState::Pulling => write!(f, "pulling"),
        }
    }
}

/// One failure during a pull
#[derive(Debug, Clone, PartialEq)]
pub struct RunError {
    /// The post being handled, when the failure concerns one post
    pub post: Option<PostSummary>,
    /// The sink that failed, when a sink failed
    pub sink: Option<String>,
    pub message: String,
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.sink, &self.post) {
            (Some(sink), Some(post)) => write!(f, "[{}] {}: {}", sink, post, self.message),
            (Some(sink), None) => write!(f, "[{}] {}", sink, self.message),
            (None, Some(post)) => write!(f, "[source] {}: {}", post, self.message),
            (None, None) => write!(f, "[source] {}", self.message),
        }
    }
}

/// Outcome of one pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Posts read from the source
    pub pulled: u64,
    /// Posts outside the time window
    pub skipped: u64,
    /// Successful pushes, counted per post and sink
    pub delivered: u64,
    /// Entries recorded in the error list
    pub errors: usize,
    pub cancelled: bool,
}

impl std::fmt::Display for PullSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pulled {} posts ({} outside window), {} deliveries, {} errors{}",
            self.pulled,
            self.skipped,
            self.delivered,
            self.errors,
            if self.cancelled { ", cancelled" } else { "" }
        )
    }
}

pub struct Pipeline {
    source: Option<Box<dyn Source>>,
    sinks: Vec<Box<dyn Sink>>,
    query: SourceQuery,
    errors: Vec<RunError>,
    cancel: Arc<AtomicBool>,
    pulling: bool,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            source: None,
            sinks: Vec::new(),
            query: SourceQuery::default(),
            errors: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            pulling: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        match (&self.source, self.pulling) {
            (_, true) => PipelineState::Pulling,
            (Some(_), false) => PipelineState::SourceBound,
            (None, false) => PipelineState::NoSource,
        }
    }

    /// The window and filter applied to every source bound from now on
    pub fn query(&self) -> &SourceQuery {
        &self.query
    }

    pub fn source(&self) -> Option<&dyn Source> {
        self.source.as_deref()
    }

    pub fn set_since(&mut self, since: Option<DateTime<Utc>>) {
        self.query.since = since;
        if let Some(source) = self.source.as_mut() {
            source.set_since(since);
        }
    }

    pub fn set_until(&mut self, until: Option<DateTime<Utc>>) {
        self.query.until = until;
        if let Some(source) = self.source.as_mut() {
            source.set_until(until);
        }
    }

    pub fn set_filter(&mut self, filter: Option<String>) {
        self.query.filter = filter.clone();
        if let Some(source) = self.source.as_mut() {
            source.set_filter(filter);
        }
    }

    /// Bind a source, replacing any previous one; the stored window and
    /// filter are applied to it straight away
    pub fn bind_source(&mut self, mut source: Box<dyn Source>) -> Option<Box<dyn Source>> {
        source.apply_query(&self.query);
        info!("Bound source: {}", source.describe());
        self.source.replace(source)
    }

    pub fn unbind_source(&mut self) -> Option<Box<dyn Source>> {
        self.source.take()
    }

    /// Add a sink at the end of the fan-out order and return its id
    pub fn enable_sink(&mut self, sink: Box<dyn Sink>) -> String {
        let id = sink.id().to_string();
        info!("Enabled sink #{} {}", id, sink.describe());
        self.sinks.push(sink);
        id
    }

    pub fn disable_sink(&mut self, id: &str) -> Option<Box<dyn Sink>> {
        let id = id.trim_start_matches('#');
        let index = self.sinks.iter().position(|s| s.id() == id)?;
        Some(self.sinks.remove(index))
    }

    pub fn sinks(&self) -> Vec<SinkInfo> {
        self.sinks.iter().map(|s| SinkInfo::of(s.as_ref())).collect()
    }

    /// Errors recorded by the last pull
    pub fn errors(&self) -> &[RunError] {
        &self.errors
    }

    /// Flag that stops a running pull after the current post
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn check_preconditions(&self) -> Result<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| JanusError::Precondition("no source bound".to_string()))?;
        if self.sinks.is_empty() {
            return Err(JanusError::Precondition("no sinks enabled".to_string()));
        }
        if let Some(sink) = self.sinks.iter().find(|s| !s.accepts(source.kind())) {
            return Err(JanusError::Precondition(format!(
                "sink #{} {} cannot take posts from a {} source",
                sink.id(),
                sink.describe(),
                source.kind()
            )));
        }
        Ok(())
    }

    /// Pull every post from the source into every sink
    ///
    /// Refuses with [`JanusError::Precondition`] before touching anything
    /// when there is no source, no sink, or a sink that does not take this
    /// kind of source. Failures during the run end up in [`Pipeline::errors`].
    pub async fn pull_posts(&mut self) -> Result<PullSummary> {
        self.check_preconditions()?;
        self.errors.clear();
        self.cancel.store(false, Ordering::SeqCst);
        self.pulling = true;

        let result = self.run().await;
        self.pulling = false;
        let summary = result?;
        info!("Pull finished: {}", summary);
        Ok(summary)
    }

    async fn run(&mut self) -> Result<PullSummary> {
        let Self {
            source,
            sinks,
            errors,
            cancel,
            ..
        } = self;
        let source = source
            .as_mut()
            .ok_or_else(|| JanusError::Precondition("no source bound".to_string()))?;

        source.authenticate().await?;
        info!("Pulling from {}", source.describe());

        let identity = source.identity();
        for sink in sinks.iter_mut() {
            sink.begin(&identity);
        }

        let window = source.query().clone();
        let filter_locally = !source.filters_server_side() && !window.is_empty();
        let mut summary = PullSummary::default();

        let mut stream = source.posts();
        loop {
            if cancel.load(Ordering::SeqCst) {
                warn!("Pull cancelled after {} posts", summary.pulled);
                summary.cancelled = true;
                break;
            }
            let Some(item) = stream.next().await else {
                break;
            };

            let post = match item {
                Ok(post) => post,
                Err(e) => {
                    warn!("Source error: {}", e);
                    errors.push(RunError {
                        post: None,
                        sink: None,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            summary.pulled += 1;

            if filter_locally && !window.contains(&post.created) {
                debug!("Skipping post {} outside the window", post.id);
                summary.skipped += 1;
                continue;
            }

            for sink in sinks.iter_mut() {
                match sink.push(&post).await {
                    Ok(()) => summary.delivered += 1,
                    Err(e) => {
                        warn!("Sink #{} failed on post {}: {}", sink.id(), post.id, e);
                        record_sink_error(errors, sink.as_ref(), Some(&post), e);
                    }
                }
            }
        }
        drop(stream);

        for sink in sinks.iter_mut() {
            if let Err(e) = sink.finished().await {
                warn!("Sink #{} failed to finish: {}", sink.id(), e);
                record_sink_error(errors, sink.as_ref(), None, e);
            }
        }

        summary.errors = errors.len();
        Ok(summary)
    }

    /// Human-readable report of the last pull's errors
    pub fn format_errors(&self) -> String {
        if self.errors.is_empty() {
            return "No errors during the last pull.".to_string();
        }
        let mut out = format!("{} errors during the last pull:\n", self.errors.len());
        for error in &self.errors {
            out.push_str(&format!("  {}\n", error));
        }
        out
    }
}

fn sink_label(sink: &dyn Sink) -> String {
    format!("#{} {}", sink.id(), sink.describe())
}

/// A rejected batch gives one entry per post in it, not just the post that
/// triggered the flush
fn record_sink_error(
    errors: &mut Vec<RunError>,
    sink: &dyn Sink,
    post: Option<&Post>,
    error: JanusError,
) {
    let message = error.to_string();
    let label = sink_label(sink);
    match error {
        JanusError::BatchRejected { posts, .. } => {
            errors.extend(posts.into_iter().map(|summary| RunError {
                post: Some(summary),
                sink: Some(label.clone()),
                message: message.clone(),
            }));
        }
        _ => errors.push(RunError {
            post: post.map(Post::summary),
            sink: Some(label),
            message,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::Post;
    use crate::sinks::MockSink;
    use crate::sources::{MockSource, SourceKind};
    use chrono::TimeZone;
    use serde_json::json;

    fn post(id: &str, created: &str) -> Post {
        Post::from_feed(json!({ "id": id, "created_time": created })).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let mut pipeline = Pipeline::new();
        assert_eq!(pipeline.state(), PipelineState::NoSource);
        pipeline.bind_source(Box::new(MockSource::new(Vec::new())));
        assert_eq!(pipeline.state(), PipelineState::SourceBound);
        assert!(pipeline.unbind_source().is_some());
        assert_eq!(pipeline.state(), PipelineState::NoSource);
    }

    #[tokio::test]
    async fn test_refuses_without_source() {
        let mut pipeline = Pipeline::new();
        pipeline.enable_sink(Box::new(MockSink::new("a")));
        let err = pipeline.pull_posts().await.unwrap_err();
        assert!(matches!(err, JanusError::Precondition(_)));
        assert!(pipeline.errors().is_empty());
    }

    #[tokio::test]
    async fn test_refuses_incompatible_sink() {
        let mut pipeline = Pipeline::new();
        pipeline.bind_source(Box::new(MockSource::new(vec![post("1", "2017-01-01T00:00:00+0000")])));
        let sink = MockSink::new("tables only").accepting_only(SourceKind::Table);
        let log = sink.log.clone();
        pipeline.enable_sink(Box::new(sink));

        let err = pipeline.pull_posts().await.unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert_eq!(MockSink::snapshot(&log).finished_calls, 0);
    }

    #[test]
    fn test_disable_sink_by_id() {
        let mut pipeline = Pipeline::new();
        let a = pipeline.enable_sink(Box::new(MockSink::new("a")));
        let b = pipeline.enable_sink(Box::new(MockSink::new("b")));

        assert!(pipeline.disable_sink(&format!("#{}", a)).is_some());
        assert!(pipeline.disable_sink(&a).is_none());
        let ids: Vec<String> = pipeline.sinks().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b]);
    }

    /// Trips the cancel flag from inside the pull, like a signal would
    struct CancellingSink {
        id: String,
        handle: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Sink for CancellingSink {
        fn name(&self) -> &str {
            "cancelling"
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn describe(&self) -> String {
            "Cancelling".to_string()
        }

        async fn push(&mut self, _post: &crate::post::Post) -> Result<()> {
            self.handle.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn finished(&mut self) -> Result<()> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancel_flag_stops_pull_but_finishes_sinks() {
        let posts = (1..=3)
            .map(|n| post(&n.to_string(), "2017-01-01T00:00:00+0000"))
            .collect();
        let mut pipeline = Pipeline::new();
        pipeline.bind_source(Box::new(MockSource::new(posts)));

        let recorder = MockSink::new("recorder");
        let log = recorder.log.clone();
        pipeline.enable_sink(Box::new(recorder));
        let finished = Arc::new(AtomicBool::new(false));
        pipeline.enable_sink(Box::new(CancellingSink {
            id: "cafef00d".to_string(),
            handle: pipeline.cancel_handle(),
            finished: finished.clone(),
        }));

        let summary = pipeline.pull_posts().await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.pulled, 1);
        assert_eq!(MockSink::snapshot(&log).pushed, vec!["1".to_string()]);
        assert_eq!(MockSink::snapshot(&log).finished_calls, 1);
        assert!(finished.load(Ordering::SeqCst));

        // The next pull starts with the flag cleared
        let summary = pipeline.pull_posts().await.unwrap();
        assert_eq!(summary.pulled, 1);
    }

    #[tokio::test]
    async fn test_window_applied_when_source_does_not_filter() {
        let posts = vec![
            post("old", "2016-12-31T23:59:59+0000"),
            post("in", "2017-01-01T00:00:00+0000"),
            post("late", "2017-01-02T00:00:00+0000"),
        ];
        let mut pipeline = Pipeline::new();
        pipeline.set_since(Some(Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap()));
        pipeline.set_until(Some(Utc.with_ymd_and_hms(2017, 1, 2, 0, 0, 0).unwrap()));
        pipeline.bind_source(Box::new(MockSource::new(posts)));
        let sink = MockSink::new("a");
        let log = sink.log.clone();
        pipeline.enable_sink(Box::new(sink));

        let summary = pipeline.pull_posts().await.unwrap();
        assert_eq!(summary.pulled, 3);
        assert_eq!(summary.skipped, 2);
        assert_eq!(MockSink::snapshot(&log).pushed, vec!["in".to_string()]);
    }

    #[tokio::test]
    async fn test_format_errors_lists_post_details() {
        let mut pipeline = Pipeline::new();
        pipeline.bind_source(Box::new(MockSource::new(vec![post(
            "42",
            "2017-01-01T08:00:00+0000",
        )])));
        pipeline.enable_sink(Box::new(MockSink::new("picky").failing_on(1)));

        assert_eq!(pipeline.format_errors(), "No errors during the last pull.");
        pipeline.pull_posts().await.unwrap();
        let report = pipeline.format_errors();
        assert!(report.starts_with("1 errors during the last pull:"));
        assert!(report.contains("Mock(picky)"));
        assert!(report.contains("42 | 2017-01-01 08:00:00 | Unknown"));
        assert!(report.contains("picky refused post 42"));
    }
}
