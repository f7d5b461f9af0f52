//! Statistics sink
//!
//! Counts posts per creation date, optionally only those matching a
//! predicate, and writes the buckets to a sidecar CSV when the pull ends.
//! The sidecar is a named temp file that is kept on disk:
//!
//! ```text
//! # Janus stats <type> created <iso time>; total <n>; filtered <m>
//! 2017-01-01;3
//! 2017-01-02;1
//! ```

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{new_sink_id, Sink};
use crate::error::{JanusError, Result};
use crate::post::Post;

/// Which posts a stats sink counts
#[derive(Debug, Clone, PartialEq)]
pub enum StatPredicate {
    All,
    Author(String),
    Text(String),
    MinLikes(u64),
    HasMedia,
}

impl StatPredicate {
    /// `author:<name>`, `text:<substring>`, `min-likes:<n>` or `has-media`
    pub fn parse(input: Option<&str>) -> Result<Self> {
        let Some(input) = input.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(StatPredicate::All);
        };
        if input == "has-media" {
            return Ok(StatPredicate::HasMedia);
        }
        match input.split_once(':') {
            Some(("author", name)) => Ok(StatPredicate::Author(name.to_string())),
            Some(("text", text)) => Ok(StatPredicate::Text(text.to_lowercase())),
            Some(("min-likes", n)) => n.trim().parse().map(StatPredicate::MinLikes).map_err(|_| {
                JanusError::InvalidInput(format!("min-likes needs a number, got '{}'", n))
            }),
            _ => Err(JanusError::InvalidInput(format!(
                "unknown stats predicate '{}' (use author:, text:, min-likes: or has-media)",
                input
            ))),
        }
    }

    pub fn matches(&self, post: &Post) -> bool {
        match self {
            StatPredicate::All => true,
            StatPredicate::Author(name) => post.author.eq_ignore_ascii_case(name),
            StatPredicate::Text(text) => post.message.to_lowercase().contains(text.as_str()),
            StatPredicate::MinLikes(n) => post.like_count >= *n,
            StatPredicate::HasMedia => !post.media.is_empty(),
        }
    }
}

/// What a finished stats sink produced
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub stat_type: String,
    /// Posts pushed
    pub total: u64,
    /// Posts left out by the predicate
    pub filtered: u64,
    pub buckets: BTreeMap<NaiveDate, u64>,
    pub path: PathBuf,
}

impl StatsReport {
    pub fn counted(&self) -> u64 {
        self.buckets.values().sum()
    }
}

pub struct StatsSink {
    id: String,
    stat_type: String,
    predicate: StatPredicate,
    dir: PathBuf,
    buckets: BTreeMap<NaiveDate, u64>,
    total: u64,
    report: Arc<Mutex<Option<StatsReport>>>,
}

impl StatsSink {
    pub fn new(stat_type: impl Into<String>, predicate: StatPredicate) -> Self {
        Self {
            id: new_sink_id(),
            stat_type: stat_type.into(),
            predicate,
            dir: std::env::temp_dir(),
            buckets: BTreeMap::new(),
            total: 0,
            report: Arc::new(Mutex::new(None)),
        }
    }

    /// Write sidecars here instead of the system temp dir
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// The report of the last finished pull
    pub fn report(&self) -> Option<StatsReport> {
        self.report
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Shared handle to the report, usable after the sink is handed over
    pub fn report_handle(&self) -> Arc<Mutex<Option<StatsReport>>> {
        Arc::clone(&self.report)
    }

    fn write_sidecar(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let (mut file, path) = tempfile::Builder::new()
            .prefix(&format!("janus_stats_{}", self.stat_type))
            .suffix(".csv")
            .tempfile_in(&self.dir)?
            .keep()
            .map_err(|e| JanusError::Io(e.error))?;

        let counted: u64 = self.buckets.values().sum();
        write!(
            file,
            "# Janus stats {} created {}; total {}; filtered {}\r\n",
            self.stat_type,
            Local::now().to_rfc3339(),
            self.total,
            self.total - counted
        )?;
        for (date, count) in &self.buckets {
            write!(file, "{};{}\r\n", date.format("%Y-%m-%d"), count)?;
        }
        file.flush()?;
        Ok(path)
    }
}

#[async_trait]
impl Sink for StatsSink {
    fn name(&self) -> &str {
        "stats"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> String {
        format!("Stats({})", self.stat_type)
    }

    async fn push(&mut self, post: &Post) -> Result<()> {
        self.total += 1;
        if self.predicate.matches(post) {
            *self.buckets.entry(post.created.date_naive()).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn finished(&mut self) -> Result<()> {
        let path = self.write_sidecar()?;
        let counted: u64 = self.buckets.values().sum();
        info!(
            "Finished processing {} posts ({} counted). {} stats in {}",
            self.total,
            counted,
            self.stat_type,
            path.display()
        );

        let report = StatsReport {
            stat_type: self.stat_type.clone(),
            total: self.total,
            filtered: self.total - counted,
            buckets: std::mem::take(&mut self.buckets),
            path,
        };
        *self.report.lock().unwrap_or_else(|e| e.into_inner()) = Some(report);
        self.total = 0;
        Ok(())
    }
}
