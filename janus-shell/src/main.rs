//! janus-shell - Line-oriented command shell for building and running pulls

use anyhow::{Context, Result};
use clap::Parser;
use libjanus::logging::{LogFormat, LoggingConfig};
use libjanus::{Config, Registry, Session};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

mod command;
mod shell;

use shell::{Reply, Shell};

#[derive(Parser, Debug)]
#[command(name = "janus-shell")]
#[command(version, about = "Command shell for building and running pulls")]
#[command(long_about = r#"Command shell for building and running pulls.

Reads one command per line from a script file or stdin. Type 'help' for the
list of commands, sources and sinks. A '#' at the start of a word starts a
comment.

EXAMPLE SESSION:
    source feed somepage
    since 2017-01-01
    until 2017-02-01
    sink file
    sink csv posts.csv tab
    pull
    errors

SIGNALS:
    Ctrl-C during a pull stops it after the current post; sinks still finish.
    A second Ctrl-C, or one at the prompt, leaves the shell.

EXIT CODES:
    0 - Every command succeeded
    otherwise the exit code of the last failed command
    (1 runtime, 2 authentication, 3 invalid input, 4 refused)
"#)]
struct Cli {
    /// Script to run instead of reading stdin
    script: Option<PathBuf>,

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
    #[arg(long, default_value = "warn", value_name = "LEVEL", env = "JANUS_LOG_LEVEL")]
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
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    let mut shell = Shell::new(Session::new(config), Registry::builtin());
    let cancel = shell.cancel_handle();
    register_signals(Arc::clone(&cancel))?;

    match &cli.script {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open script {}", path.display()))?;
            run_lines(&mut shell, BufReader::new(file), &cancel, false).await
        }
        None => {
            let interactive = std::io::stdin().is_terminal();
            run_lines(&mut shell, BufReader::new(tokio::io::stdin()), &cancel, interactive).await
        }
    }
}

/// Run commands until `exit` or end of input
///
/// Returns the exit code of the last failed command, or 0.
async fn run_lines<R: AsyncBufRead + Unpin>(
    shell: &mut Shell,
    reader: R,
    cancel: &AtomicBool,
    interactive: bool,
) -> Result<i32> {
    let mut lines = reader.lines();
    let mut status = 0;

    loop {
        // Idle: a Ctrl-C now finds the flag raised and exits. A pull lowers
        // it so the first Ctrl-C only cancels.
        cancel.store(true, Ordering::SeqCst);

        if interactive {
            print!("janus> ");
            std::io::stdout().flush().context("Failed to write prompt")?;
        }
        let Some(line) = lines.next_line().await.context("Failed to read command")? else {
            break;
        };

        match shell.run_line(&line).await {
            Ok(Some(Reply::Text(text))) => println!("{}", text),
            Ok(Some(Reply::Exit)) => break,
            Ok(None) => {}
            Err(e) => {
                eprintln!("error: {}", e);
                status = e.exit_code();
            }
        }
    }
    Ok(status)
}

#[cfg(unix)]
fn register_signals(cancel: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;

    for signal in [SIGINT, SIGTERM] {
        // Exits if the flag is already raised, so this must come first
        flag::register_conditional_shutdown(signal, 130, Arc::clone(&cancel))
            .context("Signal setup failed")?;
        flag::register(signal, Arc::clone(&cancel)).context("Signal setup failed")?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn register_signals(_cancel: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}
