//! Command execution against a pipeline

use chrono::Utc;
use libjanus::timeparse::parse_time_bound;
use libjanus::{JanusError, Pipeline, Registry, Result, Session, Sink, Source};
use std::fmt::Write as _;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::debug;

use crate::command::{Command, COMMANDS};

/// What the caller should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Exit,
}

pub struct Shell {
    pipeline: Pipeline,
    session: Session,
    registry: Registry,
}

impl Shell {
    pub fn new(session: Session, registry: Registry) -> Self {
        Self {
            pipeline: Pipeline::new(),
            session,
            registry,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.pipeline.cancel_handle()
    }

    /// Parse and run one line; blank lines and comments give `None`
    pub async fn run_line(&mut self, line: &str) -> Result<Option<Reply>> {
        match Command::parse(line)? {
            Some(command) => self.execute(command).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn execute(&mut self, command: Command) -> Result<Reply> {
        debug!("Executing {:?}", command);
        let text = match command {
            Command::Help => self.help(),
            Command::Source { kind, args } => {
                let source = self
                    .registry
                    .create_source(&kind, &mut self.session, &args)?;
                let description = source.describe();
                match self.pipeline.bind_source(source) {
                    Some(old) => format!("Bound {} (replacing {})", description, old.describe()),
                    None => format!("Bound {}", description),
                }
            }
            Command::Unbind => match self.pipeline.unbind_source() {
                Some(old) => format!("Unbound {}", old.describe()),
                None => "No source bound".to_string(),
            },
            Command::Since(input) => {
                let since = input.map(|s| parse_time_bound(&s, Utc::now())).transpose()?;
                self.pipeline.set_since(since);
                match since {
                    Some(since) => format!("since {}", since.to_rfc3339()),
                    None => "since cleared".to_string(),
                }
            }
            Command::Until(input) => {
                let until = input.map(|s| parse_time_bound(&s, Utc::now())).transpose()?;
                self.pipeline.set_until(until);
                match until {
                    Some(until) => format!("until {}", until.to_rfc3339()),
                    None => "until cleared".to_string(),
                }
            }
            Command::Filter(filter) => {
                let text = match &filter {
                    Some(filter) => format!("filter {}", filter),
                    None => "filter cleared".to_string(),
                };
                self.pipeline.set_filter(filter);
                text
            }
            Command::Sink { kind, args } => {
                let sink = self.registry.create_sink(&kind, &mut self.session, &args)?;
                let description = sink.describe();
                let id = self.pipeline.enable_sink(sink);
                format!("Enabled #{} {}", id, description)
            }
            Command::Drop(id) => match self.pipeline.disable_sink(&id) {
                Some(sink) => format!("Dropped #{} {}", sink.id(), sink.describe()),
                None => {
                    return Err(JanusError::InvalidInput(format!(
                        "no sink with id {} (see 'sinks')",
                        id
                    )))
                }
            },
            Command::Sinks => self.list_sinks(),
            Command::Status => self.status(),
            Command::Pull => {
                let summary = self.pipeline.pull_posts().await?;
                let mut text = format!("Pulled: {}", summary);
                if summary.errors > 0 {
                    text.push_str("\nType 'errors' to list them.");
                }
                text
            }
            Command::Errors => self.pipeline.format_errors().trim_end().to_string(),
            Command::Exit => return Ok(Reply::Exit),
        };
        Ok(Reply::Text(text))
    }

    fn help(&self) -> String {
        let mut out = String::from("Commands:\n");
        for (_, usage, summary) in COMMANDS {
            let _ = writeln!(out, "  {:<26} {}", usage, summary);
        }
        out.push_str("\nSources:\n");
        for entry in self.registry.sources() {
            let _ = writeln!(out, "  {:<26} {}", entry.usage, entry.help);
        }
        out.push_str("\nSinks:\n");
        for entry in self.registry.sinks() {
            let _ = writeln!(out, "  {:<26} {}", entry.usage, entry.help);
        }
        out.push_str("\nTimes: Unix timestamps, YYYY-MM-DD, RFC 3339, 2d (ago), yesterday.");
        out
    }

    fn list_sinks(&self) -> String {
        let sinks = self.pipeline.sinks();
        if sinks.is_empty() {
            return "No sinks enabled".to_string();
        }
        sinks
            .iter()
            .map(|sink| sink.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn status(&self) -> String {
        let query = self.pipeline.query();
        let bound = |t: Option<chrono::DateTime<Utc>>| {
            t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
        };

        let mut out = format!("State:  {}\n", self.pipeline.state());
        let _ = writeln!(
            out,
            "Source: {}",
            self.pipeline
                .source()
                .map(|s| s.describe())
                .unwrap_or_else(|| "-".to_string())
        );
        let _ = writeln!(out, "Since:  {}", bound(query.since));
        let _ = writeln!(out, "Until:  {}", bound(query.until));
        let _ = writeln!(out, "Filter: {}", query.filter.as_deref().unwrap_or("-"));
        let _ = write!(
            out,
            "Sinks:  {} enabled, {} errors from the last pull",
            self.pipeline.sinks().len(),
            self.pipeline.errors().len()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libjanus::config::Config;
    use libjanus::registry::{Entry, SourceCtor};
    use libjanus::sinks::MockSink;
    use libjanus::sources::{MockSource, Source};
    use libjanus::store::MockStore;
    use libjanus::{Post, PipelineState};
    use serde_json::json;

    fn mock_source(_session: &mut Session, args: &[String]) -> Result<Box<dyn Source>> {
        let posts = args
            .iter()
            .map(|id| Post::from_feed(json!({ "id": id, "created_time": "2017-01-01T10:00:00+0000" })))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(MockSource::new(posts)))
    }

    fn shell() -> Shell {
        let mut registry = Registry::builtin();
        registry.register_source(Entry::new(
            "mock",
            "mock [ids...]",
            "canned posts",
            mock_source as SourceCtor,
        ));
        let session = Session::new(Config::default()).with_store(Arc::new(MockStore::new()));
        Shell::new(session, registry)
    }

    async fn text(shell: &mut Shell, line: &str) -> String {
        match shell.run_line(line).await.unwrap() {
            Some(Reply::Text(text)) => text,
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_help_lists_registry() {
        let mut shell = shell();
        let help = text(&mut shell, "help").await;
        assert!(help.contains("source <kind> [args...]"));
        assert!(help.contains("csv <path> [delimiter]"));
        assert!(help.contains("mock [ids...]"));
    }

    #[tokio::test]
    async fn test_bind_and_replace_source() {
        let mut shell = shell();
        assert_eq!(text(&mut shell, "source mock 1").await, "Bound Mock source (1 posts)");
        assert_eq!(
            text(&mut shell, "source mock 1 2").await,
            "Bound Mock source (2 posts) (replacing Mock source (1 posts))"
        );
        assert_eq!(shell.pipeline().state(), PipelineState::SourceBound);
        assert_eq!(text(&mut shell, "unbind").await, "Unbound Mock source (2 posts)");
        assert_eq!(text(&mut shell, "unbind").await, "No source bound");
    }

    #[tokio::test]
    async fn test_window_and_filter() {
        let mut shell = shell();
        assert_eq!(
            text(&mut shell, "since 2017-01-01").await,
            "since 2017-01-01T00:00:00+00:00"
        );
        text(&mut shell, "filter with = location").await;
        text(&mut shell, "source mock 1").await;
        let source = shell.pipeline().source().unwrap();
        assert!(source.query().since.is_some());
        assert_eq!(source.query().filter.as_deref(), Some("with = location"));

        assert_eq!(text(&mut shell, "since").await, "since cleared");
        assert!(shell.pipeline().source().unwrap().query().since.is_none());

        let err = shell.run_line("until whenever it suits").await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_sinks_and_drop() {
        let mut shell = shell();
        assert_eq!(text(&mut shell, "sinks").await, "No sinks enabled");

        let enabled = text(&mut shell, "sink csv out.csv tab").await;
        assert!(enabled.starts_with("Enabled #"));
        let id = enabled
            .trim_start_matches("Enabled #")
            .split_whitespace()
            .next()
            .unwrap()
            .to_string();
        assert!(text(&mut shell, "sinks").await.contains(&format!("#{} CSVFile(out.csv)", id)));

        assert!(text(&mut shell, &format!("drop {}", id)).await.starts_with("Dropped"));
        assert!(shell.run_line(&format!("drop {}", id)).await.is_err());
    }

    #[tokio::test]
    async fn test_pull_and_errors() {
        let mut shell = shell();
        text(&mut shell, "source mock 1 2 3").await;

        let err = shell.run_line("pull").await.unwrap_err();
        assert_eq!(err.exit_code(), 4);

        shell
            .pipeline
            .enable_sink(Box::new(MockSink::new("picky").failing_on(2)));
        let pulled = text(&mut shell, "pull").await;
        assert!(pulled.contains("pulled 3 posts"));
        assert!(pulled.contains("Type 'errors'"));

        let errors = text(&mut shell, "errors").await;
        assert!(errors.starts_with("1 errors during the last pull:"));
        assert!(errors.contains("picky refused post 2"));

        let status = text(&mut shell, "status").await;
        assert!(status.contains("State:  source bound"));
        assert!(status.contains("1 errors from the last pull"));
    }

    #[tokio::test]
    async fn test_exit_and_comments() {
        let mut shell = shell();
        assert_eq!(shell.run_line("# comment only").await.unwrap(), None);
        assert_eq!(shell.run_line("exit").await.unwrap(), Some(Reply::Exit));
    }
}
