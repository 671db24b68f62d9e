//! Destinations for extracted fields.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::models::task::{ExtractedFields, LabelType, Task, TaskId};

/// Receives the fields of every task that finished `done`.
pub trait ResultSink: Send + Sync {
    fn emit(&self, task: &Task, fields: &ExtractedFields) -> Result<()>;
}

/// One finished task, as written by the sinks.
#[derive(Debug, Serialize)]
pub struct ResultRecord<'a> {
    pub task_id: TaskId,
    pub file_path: &'a Path,
    pub label_type: LabelType,
    pub fields: &'a ExtractedFields,
    pub finished_at: DateTime<Utc>,
}

impl<'a> ResultRecord<'a> {
    pub fn new(task: &'a Task, fields: &'a ExtractedFields) -> Self {
        Self {
            task_id: task.id,
            file_path: &task.document_path,
            label_type: task.label_type,
            fields,
            finished_at: Utc::now(),
        }
    }
}

/// Logs the fields as pretty JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn emit(&self, task: &Task, fields: &ExtractedFields) -> Result<()> {
        let json = serde_json::to_string_pretty(fields)?;
        info!("Extracted {} label fields for {}:\n{}", task.label_type, task.document_path.display(), json);
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// Open `path` for appending, creating it if missing.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonlSink {
    fn emit(&self, task: &Task, fields: &ExtractedFields) -> Result<()> {
        let mut line = serde_json::to_vec(&ResultRecord::new(task, fields))?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// Sends every result to each inner sink in turn.
///
/// Stops at the first failing sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ResultSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl ResultSink for FanoutSink {
    fn emit(&self, task: &Task, fields: &ExtractedFields) -> Result<()> {
        self.sinks.iter().try_for_each(|sink| sink.emit(task, fields))
    }
}
