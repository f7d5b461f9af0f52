//! Post sinks
//!
//! Every enabled sink receives every post the pipeline pulls, in
//! registration order. A sink sees one `begin`, `push` zero or more times
//! and then exactly one `finished` per pull; buffered sinks flush there.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::post::Post;
use crate::sources::SourceKind;

pub mod csv;
pub mod file;
pub mod mock;
pub mod stats;
pub mod table;
pub mod update;

pub use self::csv::CsvSink;
pub use file::FileSink;
pub use mock::MockSink;
pub use stats::{StatPredicate, StatsReport, StatsSink};
pub use table::TableSink;
pub use update::UpdateSink;

/// Short identity token for a sink, e.g. `3f2a9c1d`
pub fn new_sink_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[async_trait]
pub trait Sink: Send {
    /// Sink kind as used on the command line ("file", "csv", ...)
    fn name(&self) -> &str;

    fn id(&self) -> &str;

    /// Human-readable name including the target
    fn describe(&self) -> String;

    /// Start of a pull from the source with this identity
    fn begin(&mut self, _source: &str) {}

    async fn push(&mut self, post: &Post) -> Result<()>;

    /// End of a pull; flush anything buffered
    async fn finished(&mut self) -> Result<()>;

    /// Whether the sink can consume posts from this kind of source
    fn accepts(&self, _kind: SourceKind) -> bool {
        true
    }
}

/// Listing entry for an enabled sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl SinkInfo {
    pub fn of(sink: &dyn Sink) -> Self {
        Self {
            id: sink.id().to_string(),
            name: sink.name().to_string(),
            description: sink.describe(),
        }
    }
}

impl std::fmt::Display for SinkInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {}", self.id, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_ids_are_short_hex() {
        let a = new_sink_id();
        let b = new_sink_id();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
