//! CSV sink
//!
//! Appends one row per post with every canonical column. The header row is
//! written only when the file is new or empty, so repeated pulls into the
//! same file produce a single table.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{new_sink_id, Sink};
use crate::error::{JanusError, Result};
use crate::post::Post;
use crate::projection::{project, COLUMNS};

pub struct CsvSink {
    id: String,
    path: PathBuf,
    delimiter: u8,
    writer: Option<::csv::Writer<File>>,
    written: u64,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, delimiter: u8) -> Self {
        Self {
            id: new_sink_id(),
            path: path.into(),
            delimiter,
            writer: None,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut ::csv::Writer<File>> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let needs_header = file.metadata()?.len() == 0;

            let mut writer = ::csv::WriterBuilder::new()
                .delimiter(self.delimiter)
                .has_headers(false)
                .from_writer(file);
            if needs_header {
                writer
                    .write_record(COLUMNS.iter().map(|c| c.name()))
                    .map_err(csv_error)?;
                debug!("Wrote CSV header to {}", self.path.display());
            }
            self.writer = Some(writer);
        }

        self.writer
            .as_mut()
            .ok_or_else(|| JanusError::InvalidInput("CSV writer unavailable".to_string()))
    }
}

/// Parse a delimiter argument: a single ASCII character, or `tab`
pub fn parse_delimiter(arg: Option<&str>) -> Result<u8> {
    match arg {
        None => Ok(b','),
        Some("tab") | Some("\\t") => Ok(b'\t'),
        Some(s) if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        Some(s) => Err(JanusError::InvalidInput(format!(
            "CSV delimiter must be a single ASCII character, got '{}'",
            s
        ))),
    }
}

fn csv_error(err: ::csv::Error) -> JanusError {
    match err.into_kind() {
        ::csv::ErrorKind::Io(io) => JanusError::Io(io),
        other => JanusError::InvalidInput(format!("CSV write failed: {:?}", other)),
    }
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn describe(&self) -> String {
        format!("CSVFile({})", self.path.display())
    }

    async fn push(&mut self, post: &Post) -> Result<()> {
        let row = project(post);
        let writer = self.writer()?;
        writer
            .write_record(row.cells.iter().map(|(_, cell)| cell.to_string()))
            .map_err(csv_error)?;
        self.written += 1;
        Ok(())
    }

    async fn finished(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!("Wrote {} rows to {}", self.written, self.path.display());
        }
        self.written = 0;
        Ok(())
    }
}
