//! janus-pull - Pull posts from one source into one or more sinks

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use libjanus::logging::{LogFormat, LoggingConfig};
use libjanus::timeparse::parse_time_bound;
use libjanus::{Config, JanusError, Pipeline, Registry, Session};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "janus-pull")]
#[command(version, about = "Pull posts from one source into one or more sinks")]
#[command(long_about = r#"Pull posts from one source into one or more sinks.

Sources and sinks are given as KIND:ARG[,ARG...].

SOURCES:
    feed:<page>          posts from a page's live feed
    cache:<page>[,<dir>] JSON documents cached for a page under <dir>/<page>
    table:<table>        rows from the tabular store

SINKS:
    file[:<dir>]                     write each post as <dir>/<source>/<id>.json
    csv:<path>[,<delimiter>]         append one row per post (delimiter "tab" or one character)
    table:<table>                    insert posts into the tabular store in batches
    stats[:<type>[,<predicate>]]     count posts per day into a sidecar CSV
    update:<table>[,<column>...]     refresh stored rows with live counts (table source only)

EXAMPLES:
    # Cache a page's January posts to ./data/somepage
    janus-pull --source feed:somepage --since 2017-01-01 --until 2017-02-01 --sink file

    # Fan the cache out to a spreadsheet and the local table
    janus-pull --source cache:somepage --sink csv:posts.csv,tab --sink table:posts

    # Refresh like and share counts of last week's stored posts
    janus-pull --source table:posts --since 7d --sink update:posts,Likes,Shares

TIMES:
    Unix timestamps, YYYY-MM-DD, RFC 3339, durations meaning "ago" (2d, 36h)
    or natural language (yesterday, last monday).

EXIT CODES:
    0 - Pull completed without errors
    1 - Pull completed with recorded errors, or a runtime error
    2 - Authentication error (or invalid command-line usage)
    3 - Invalid input
    4 - Pull refused (incompatible source and sink)
"#)]
struct Cli {
    /// Source to pull from
    #[arg(long, value_name = "KIND:ARGS")]
    source: String,

    /// Sink to push into (repeatable; posts reach sinks in this order)
    #[arg(long = "sink", value_name = "KIND:ARGS", required = true)]
    sinks: Vec<String>,

    /// Only posts created at or after this time
    #[arg(long, value_name = "TIME")]
    since: Option<String>,

    /// Only posts created before this time
    #[arg(long, value_name = "TIME")]
    until: Option<String>,

    /// Backend filter (query parameters for a feed, a WHERE clause for a table)
    #[arg(long, value_name = "TEXT")]
    filter: Option<String>,

    /// Configuration file (defaults to $JANUS_CONFIG or ~/.config/janus/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, default_value = "text", value_name = "FORMAT", env = "JANUS_LOG_FORMAT")]
    log_format: LogFormat,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info", value_name = "LEVEL", env = "JANUS_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, cli.log_level.clone(), cli.verbose).init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    debug!("janus-pull started with args: {:?}", cli);

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    let mut session = Session::new(config);
    let registry = Registry::builtin();
    let mut pipeline = Pipeline::new();

    let now = Utc::now();
    if let Some(since) = &cli.since {
        pipeline.set_since(Some(parse_time_bound(since, now).context("Invalid --since")?));
    }
    if let Some(until) = &cli.until {
        pipeline.set_until(Some(parse_time_bound(until, now).context("Invalid --until")?));
    }
    pipeline.set_filter(cli.filter.clone());

    let (kind, args) = parse_target(&cli.source)?;
    let source = registry
        .create_source(&kind, &mut session, &args)
        .with_context(|| format!("Cannot create source '{}'", cli.source))?;
    pipeline.bind_source(source);

    for spec in &cli.sinks {
        let (kind, args) = parse_target(spec)?;
        let sink = registry
            .create_sink(&kind, &mut session, &args)
            .with_context(|| format!("Cannot create sink '{}'", spec))?;
        pipeline.enable_sink(sink);
    }

    register_signals(pipeline.cancel_handle())?;

    let summary = pipeline.pull_posts().await?;
    info!("{}", summary);
    println!("{}", summary);

    if pipeline.errors().is_empty() {
        Ok(0)
    } else {
        eprint!("{}", pipeline.format_errors());
        Ok(1)
    }
}

/// Split `kind:arg,arg` into the registry name and its arguments
fn parse_target(spec: &str) -> Result<(String, Vec<String>)> {
    let (kind, args) = spec.split_once(':').unwrap_or((spec, ""));
    let kind = kind.trim();
    if kind.is_empty() {
        return Err(JanusError::InvalidInput(format!("'{}' names no kind", spec)).into());
    }
    let args = if args.is_empty() {
        Vec::new()
    } else {
        args.split(',').map(|arg| arg.trim().to_string()).collect()
    };
    Ok((kind.to_string(), args))
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<JanusError>()
        .map(JanusError::exit_code)
        .unwrap_or(1)
}

/// SIGINT and SIGTERM stop the pull after the current post
#[cfg(unix)]
fn register_signals(cancel: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&cancel))
            .context("Signal setup failed")?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn register_signals(_cancel: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}
