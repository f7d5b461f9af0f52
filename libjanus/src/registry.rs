//! Name to constructor mapping for sources and sinks
//!
//! Both front ends build sources and sinks from a kind name plus string
//! arguments (`csv out.csv ;`, `table posts`). The registry is the one place
//! those names are defined.

use std::path::PathBuf;

use crate::error::{JanusError, Result};
use crate::session::Session;
use crate::sinks::{
    csv::parse_delimiter, update::parse_columns, CsvSink, FileSink, Sink, StatPredicate,
    StatsSink, TableSink, UpdateSink,
};
use crate::sources::{CacheSource, FeedSource, Source, TableSource};

pub type SourceCtor = fn(&mut Session, &[String]) -> Result<Box<dyn Source>>;
pub type SinkCtor = fn(&mut Session, &[String]) -> Result<Box<dyn Sink>>;

pub struct Entry<C> {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    ctor: C,
}

impl<C> Entry<C> {
    pub fn new(name: &'static str, usage: &'static str, help: &'static str, ctor: C) -> Self {
        Self {
            name,
            usage,
            help,
            ctor,
        }
    }
}

pub struct Registry {
    sources: Vec<Entry<SourceCtor>>,
    sinks: Vec<Entry<SinkCtor>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    /// Empty registry, for front ends that assemble their own set
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
            sinks: Vec::new(),
        }
    }

    /// Every source and sink this crate ships
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_source(Entry::new(
            "feed",
            "feed <page>",
            "posts from a page's live feed",
            feed_source as SourceCtor,
        ));
        registry.register_source(Entry::new(
            "cache",
            "cache <page> [dir]",
            "JSON documents cached for a page under <dir>/<page>",
            cache_source as SourceCtor,
        ));
        registry.register_source(Entry::new(
            "table",
            "table <table>",
            "rows from the tabular store",
            table_source as SourceCtor,
        ));

        registry.register_sink(Entry::new(
            "file",
            "file [dir]",
            "write each post as <dir>/<source>/<id>.json",
            file_sink as SinkCtor,
        ));
        registry.register_sink(Entry::new(
            "csv",
            "csv <path> [delimiter]",
            "append one row per post to a CSV file",
            csv_sink as SinkCtor,
        ));
        registry.register_sink(Entry::new(
            "table",
            "table <table>",
            "insert posts into the tabular store in batches",
            table_sink as SinkCtor,
        ));
        registry.register_sink(Entry::new(
            "stats",
            "stats [type] [author:<name>|text:<s>|min-likes:<n>|has-media]",
            "count posts per day into a sidecar CSV",
            stats_sink as SinkCtor,
        ));
        registry.register_sink(Entry::new(
            "update",
            "update <table> [columns...]",
            "refresh stored rows with live counts (table source only)",
            update_sink as SinkCtor,
        ));
        registry
    }

    pub fn register_source(&mut self, entry: Entry<SourceCtor>) {
        self.sources.retain(|e| e.name != entry.name);
        self.sources.push(entry);
    }

    pub fn register_sink(&mut self, entry: Entry<SinkCtor>) {
        self.sinks.retain(|e| e.name != entry.name);
        self.sinks.push(entry);
    }

    pub fn sources(&self) -> &[Entry<SourceCtor>] {
        &self.sources
    }

    pub fn sinks(&self) -> &[Entry<SinkCtor>] {
        &self.sinks
    }

    pub fn create_source(
        &self,
        name: &str,
        session: &mut Session,
        args: &[String],
    ) -> Result<Box<dyn Source>> {
        let entry = self
            .sources
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| unknown("source", name, self.sources.iter().map(|e| e.name)))?;
        (entry.ctor)(session, args)
    }

    pub fn create_sink(
        &self,
        name: &str,
        session: &mut Session,
        args: &[String],
    ) -> Result<Box<dyn Sink>> {
        let entry = self
            .sinks
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| unknown("sink", name, self.sinks.iter().map(|e| e.name)))?;
        (entry.ctor)(session, args)
    }
}

fn unknown<'a>(what: &str, name: &str, known: impl Iterator<Item = &'a str>) -> JanusError {
    let known: Vec<&str> = known.collect();
    JanusError::InvalidInput(format!(
        "unknown {} '{}' (known: {})",
        what,
        name,
        known.join(", ")
    ))
}

fn required<'a>(args: &'a [String], what: &str, usage: &str) -> Result<&'a str> {
    args.first()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| JanusError::InvalidInput(format!("missing {}; usage: {}", what, usage)))
}

fn dir_or_default(session: &Session, arg: Option<&String>) -> PathBuf {
    arg.map(|dir| crate::config::expand_path(dir))
        .unwrap_or_else(|| session.cache_dir())
}

fn feed_source(session: &mut Session, args: &[String]) -> Result<Box<dyn Source>> {
    let page = required(args, "page name", "feed <page>")?;
    Ok(Box::new(FeedSource::new(session.feed_client()?, page)))
}

fn cache_source(session: &mut Session, args: &[String]) -> Result<Box<dyn Source>> {
    let page = required(args, "page name", "cache <page> [dir]")?;
    let dir = dir_or_default(session, args.get(1));
    Ok(Box::new(CacheSource::new(dir.join(page))))
}

fn table_source(session: &mut Session, args: &[String]) -> Result<Box<dyn Source>> {
    let table = required(args, "table name", "table <table>")?;
    Ok(Box::new(TableSource::new(session.store()?, table)))
}

fn file_sink(session: &mut Session, args: &[String]) -> Result<Box<dyn Sink>> {
    Ok(Box::new(FileSink::new(dir_or_default(session, args.first()))))
}

fn csv_sink(_session: &mut Session, args: &[String]) -> Result<Box<dyn Sink>> {
    let path = required(args, "CSV path", "csv <path> [delimiter]")?;
    let delimiter = parse_delimiter(args.get(1).map(String::as_str))?;
    Ok(Box::new(CsvSink::new(crate::config::expand_path(path), delimiter)))
}

fn table_sink(session: &mut Session, args: &[String]) -> Result<Box<dyn Sink>> {
    let table = required(args, "table name", "table <table>")?;
    let cooldown = session.cooldown()?;
    let batch_size = session.batch_size();
    Ok(Box::new(
        TableSink::new(session.store()?, table)
            .with_batch_size(batch_size)
            .with_cooldown(cooldown),
    ))
}

/// The stats type ends up in the sidecar file name
fn stat_type(arg: Option<&String>) -> Result<&str> {
    let Some(stat_type) = arg.map(String::as_str) else {
        return Ok("daily");
    };
    let valid = !stat_type.is_empty()
        && stat_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(JanusError::InvalidInput(format!(
            "Invalid stats type '{}': use letters, digits, '_' or '-'",
            stat_type
        )));
    }
    Ok(stat_type)
}

fn stats_sink(session: &mut Session, args: &[String]) -> Result<Box<dyn Sink>> {
    let stat_type = stat_type(args.first())?;
    let predicate = if args.len() > 1 {
        StatPredicate::parse(Some(&args[1..].join(" ")))?
    } else {
        StatPredicate::All
    };
    let mut sink = StatsSink::new(stat_type, predicate);
    if let Some(dir) = session.stats_dir() {
        sink = sink.in_dir(dir);
    }
    Ok(Box::new(sink))
}

fn update_sink(session: &mut Session, args: &[String]) -> Result<Box<dyn Sink>> {
    let table = required(args, "table name", "update <table> [columns...]")?;
    let columns = parse_columns(&args[1..])?;
    Ok(Box::new(UpdateSink::new(
        session.feed_client()?,
        session.store()?,
        table,
        columns,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sources::SourceKind;
    use crate::store::MockStore;
    use std::sync::Arc;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn session() -> Session {
        Session::new(Config::default()).with_store(Arc::new(MockStore::new()))
    }

    #[test]
    fn test_builtin_names() {
        let registry = Registry::builtin();
        let sources: Vec<&str> = registry.sources().iter().map(|e| e.name).collect();
        let sinks: Vec<&str> = registry.sinks().iter().map(|e| e.name).collect();
        assert_eq!(sources, vec!["feed", "cache", "table"]);
        assert_eq!(sinks, vec!["file", "csv", "table", "stats", "update"]);
    }

    #[test]
    fn test_create_source() {
        let registry = Registry::builtin();
        let mut session = session();

        let feed = registry
            .create_source("feed", &mut session, &args(&["somepage"]))
            .unwrap();
        assert_eq!(feed.kind(), SourceKind::Feed);
        assert_eq!(feed.describe(), "Feed for somepage");

        let table = registry
            .create_source("table", &mut session, &args(&["posts"]))
            .unwrap();
        assert_eq!(table.kind(), SourceKind::Table);

        let cache = registry
            .create_source("cache", &mut session, &args(&["somepage"]))
            .unwrap();
        assert_eq!(cache.describe(), "Disk cache in ./data/somepage");
        assert_eq!(cache.identity(), "somepage");

        let elsewhere = registry
            .create_source("cache", &mut session, &args(&["somepage", "/srv/janus"]))
            .unwrap();
        assert_eq!(elsewhere.describe(), "Disk cache in /srv/janus/somepage");
        assert!(registry.create_source("cache", &mut session, &[]).is_err());
    }

    #[test]
    fn test_create_sinks() {
        let registry = Registry::builtin();
        let mut session = session();

        let csv = registry
            .create_sink("csv", &mut session, &args(&["out.csv", ";"]))
            .unwrap();
        assert_eq!(csv.name(), "csv");

        let stats = registry
            .create_sink("stats", &mut session, &args(&["likes", "text:hello", "world"]))
            .unwrap();
        assert_eq!(stats.describe(), "Stats(likes)");

        let update = registry
            .create_sink("update", &mut session, &args(&["posts", "Likes"]))
            .unwrap();
        assert!(update.describe().contains("Likes"));
        assert!(!update.accepts(SourceKind::Feed));
    }

    #[test]
    fn test_bad_input_rejected() {
        let registry = Registry::builtin();
        let mut session = session();

        let err = registry.create_sink("fax", &mut session, &[]).err().unwrap();
        assert!(err.to_string().contains("known: file, csv, table, stats, update"));

        let err = registry.create_sink("csv", &mut session, &[]).err().unwrap();
        assert_eq!(err.exit_code(), 3);

        let err = registry
            .create_sink("csv", &mut session, &args(&["out.csv", "::"]))
            .err().unwrap();
        assert!(matches!(err, JanusError::InvalidInput(_)));

        assert!(registry.create_source("feed", &mut session, &[]).is_err());
    }

    #[test]
    fn test_stats_type_stays_in_stats_dir() {
        let registry = Registry::builtin();
        let mut session = session();

        for bad in ["../../x", "a/b", "..", ""] {
            let err = registry
                .create_sink("stats", &mut session, &args(&[bad]))
                .err()
                .unwrap_or_else(|| panic!("'{}' accepted", bad));
            assert_eq!(err.exit_code(), 3);
        }
        let daily = registry.create_sink("stats", &mut session, &[]).unwrap();
        assert_eq!(daily.describe(), "Stats(daily)");
        assert!(registry
            .create_sink("stats", &mut session, &args(&["per-day_2"]))
            .is_ok());
    }
}
