//! Shell command parsing
//!
//! Lines are split into words the way a POSIX shell would: whitespace
//! separates words, single quotes keep everything literal, double quotes
//! and backslashes escape, and a `#` at the start of a word comments out
//! the rest of the line.

use libjanus::{JanusError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Source { kind: String, args: Vec<String> },
    Unbind,
    /// `None` clears the bound
    Since(Option<String>),
    Until(Option<String>),
    Filter(Option<String>),
    Sink { kind: String, args: Vec<String> },
    Drop(String),
    Sinks,
    Status,
    Pull,
    Errors,
    Exit,
}

/// Name, usage and summary of every command, in help order
pub const COMMANDS: [(&str, &str, &str); 13] = [
    ("help", "help", "list commands, sources and sinks"),
    ("source", "source <kind> [args...]", "bind a source, replacing the current one"),
    ("unbind", "unbind", "unbind the current source"),
    ("since", "since [time]", "only posts at or after this time; no argument clears"),
    ("until", "until [time]", "only posts before this time; no argument clears"),
    ("filter", "filter [text...]", "backend filter; no argument clears"),
    ("sink", "sink <kind> [args...]", "enable a sink"),
    ("drop", "drop <id>", "disable the sink with this id"),
    ("sinks", "sinks", "list enabled sinks"),
    ("status", "status", "show source, window and sinks"),
    ("pull", "pull", "pull every post from the source into every sink"),
    ("errors", "errors", "list errors from the last pull"),
    ("exit", "exit", "leave the shell"),
];

impl Command {
    /// Parse one input line; blank lines and comments give `None`
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let mut words = split_words(line)?.into_iter();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<String> = words.collect();
        let joined = || (!rest.is_empty()).then(|| rest.join(" "));

        let command = match name.as_str() {
            "help" | "?" => Command::Help,
            "source" => {
                let (kind, args) = kind_and_args(&name, &rest)?;
                Command::Source { kind, args }
            }
            "unbind" => Command::Unbind,
            "since" => Command::Since(joined()),
            "until" => Command::Until(joined()),
            "filter" => Command::Filter(joined()),
            "sink" => {
                let (kind, args) = kind_and_args(&name, &rest)?;
                Command::Sink { kind, args }
            }
            "drop" => match rest.as_slice() {
                [id] => Command::Drop(id.clone()),
                _ => return Err(usage("drop")),
            },
            "sinks" => Command::Sinks,
            "status" => Command::Status,
            "pull" => Command::Pull,
            "errors" => Command::Errors,
            "exit" | "quit" => Command::Exit,
            other => {
                return Err(JanusError::InvalidInput(format!(
                    "{}: no such command (try 'help')",
                    other
                )))
            }
        };
        Ok(Some(command))
    }
}

fn kind_and_args(name: &str, rest: &[String]) -> Result<(String, Vec<String>)> {
    match rest.split_first() {
        Some((kind, args)) => Ok((kind.clone(), args.to_vec())),
        None => Err(usage(name)),
    }
}

fn usage(name: &str) -> JanusError {
    let usage = COMMANDS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, usage, _)| *usage)
        .unwrap_or(name);
    JanusError::InvalidInput(format!("usage: {}", usage))
}

/// Split a line into words, honouring quotes and comments
pub fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '#' if !in_word => break,
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(unterminated('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c) => word.push(c),
                            None => return Err(unterminated('"')),
                        },
                        Some(c) => word.push(c),
                        None => return Err(unterminated('"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(c) = chars.next() {
                    word.push(c);
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

fn unterminated(quote: char) -> JanusError {
    JanusError::InvalidInput(format!("unterminated {} quote", quote))
}
