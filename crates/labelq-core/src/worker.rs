//! The worker loop.
//!
//! Pulls one task at a time from a [`TaskSource`], reads the document text,
//! asks the extraction client for fields and settles the task with exactly
//! one terminal status. Per-task failures become statuses; only store or
//! broker failures end the loop with an error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::InfraError;
use crate::fields::FieldExtractionClient;
use crate::models::config::WorkerConfig;
use crate::models::task::{ExtractedFields, Task, TaskStatus};
use crate::sink::ResultSink;
use crate::source::{Completion, Next, TaskSource};
use crate::text::DocumentReader;

/// Terminal status of one task, with the fields when it succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub fields: Option<ExtractedFields>,
}

impl TaskOutcome {
    fn done(fields: ExtractedFields) -> Self {
        Self {
            status: TaskStatus::Done,
            fields: Some(fields),
        }
    }

    fn status(status: TaskStatus) -> Self {
        Self {
            status,
            fields: None,
        }
    }
}

/// Tasks settled during one [`Worker::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub done: u64,
    pub failed: u64,
    pub error: u64,
}

impl RunSummary {
    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Done => self.done += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Error => self.error += 1,
            TaskStatus::Pending | TaskStatus::Processing => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.done + self.failed + self.error
    }
}

/// Drives tasks from `S` through extraction.
pub struct Worker<S> {
    source: S,
    reader: Arc<dyn DocumentReader>,
    client: FieldExtractionClient,
    sink: Arc<dyn ResultSink>,
    poll_interval: Duration,
    drain: bool,
}

impl<S: TaskSource> Worker<S> {
    pub fn new(
        source: S,
        reader: Arc<dyn DocumentReader>,
        client: FieldExtractionClient,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            source,
            reader,
            client,
            sink,
            poll_interval: defaults.poll_interval(),
            drain: defaults.drain,
        }
    }

    /// Apply polling and drain settings from `config`.
    pub fn with_config(mut self, config: &WorkerConfig) -> Self {
        self.poll_interval = config.poll_interval();
        self.drain = config.drain;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Return once no pending task remains instead of polling forever.
    pub fn with_drain(mut self, drain: bool) -> Self {
        self.drain = drain;
        self
    }

    /// Consume the worker, returning its source.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Process tasks until drained, closed, or `shutdown` turns true.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary, InfraError> {
        let mut summary = RunSummary::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                next = self.source.next() => next?,
                _ = shutdown_requested(&mut shutdown) => break,
            };

            let task = match next {
                Next::Task(task) => task,
                Next::Closed => {
                    info!("Task source closed");
                    break;
                }
                Next::Idle { pending } => {
                    if self.drain && pending == 0 {
                        info!("No pending tasks left, stopping");
                        break;
                    }
                    debug!("No claimable task ({} pending), sleeping {:?}", pending, self.poll_interval);
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => continue,
                        _ = shutdown_requested(&mut shutdown) => break,
                    }
                }
            };

            let started = Instant::now();
            let outcome = tokio::select! {
                outcome = self.process(&task) => outcome,
                _ = shutdown_requested(&mut shutdown) => {
                    warn!("Shutdown requested, abandoning task {}", task.id);
                    self.source.abandon(&task).await?;
                    break;
                }
            };

            if self.source.complete(&task, outcome.status).await? == Completion::LeaseLost {
                continue;
            }
            log_outcome(&task, outcome.status, started.elapsed());
            summary.record(outcome.status);

            if let Some(fields) = &outcome.fields {
                if let Err(e) = self.sink.emit(&task, fields) {
                    error!("Result sink failed for task {}: {}", task.id, e);
                }
            }
        }

        info!(
            "Worker stopped: {} done, {} failed, {} error",
            summary.done, summary.failed, summary.error
        );
        Ok(summary)
    }

    /// Run one claimed task to its terminal outcome.
    ///
    /// Never fails: unreadable documents end in `error`, unusable extraction
    /// results in `failed`, and a panic in either stage in `error`.
    pub async fn process(&self, task: &Task) -> TaskOutcome {
        let reader = Arc::clone(&self.reader);
        let path = task.document_path.clone();
        let extraction = match tokio::task::spawn_blocking(move || reader.read_text(&path)).await {
            Ok(extraction) => extraction,
            Err(e) => {
                error!("Text extraction for task {} panicked: {}", task.id, e);
                return TaskOutcome::status(TaskStatus::Error);
            }
        };

        if extraction.is_empty() {
            warn!(
                "No text in {} ({})",
                task.document_path.display(),
                extraction.diagnostics.join("; ")
            );
            return TaskOutcome::status(TaskStatus::Error);
        }
        debug!(
            "Task {}: {} chars of {} text",
            task.id,
            extraction.text.len(),
            extraction.source
        );

        let call = self.client.extract_fields(&extraction.text, task.label_type);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(fields)) => TaskOutcome::done(fields),
            Ok(Err(reason)) => {
                warn!("Task {}: fields unavailable: {}", task.id, reason);
                TaskOutcome::status(TaskStatus::Failed)
            }
            Err(_) => {
                error!("Field extraction for task {} panicked", task.id);
                TaskOutcome::status(TaskStatus::Error)
            }
        }
    }
}

/// Resolves once the shutdown flag turns true. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn log_outcome(task: &Task, status: TaskStatus, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    let path = task.document_path.display();
    match status {
        TaskStatus::Done => info!(
            task_id = %task.id,
            path = %path,
            label_type = %task.label_type,
            status = %status,
            elapsed_ms,
            "task finished"
        ),
        _ => warn!(
            task_id = %task.id,
            path = %path,
            label_type = %task.label_type,
            status = %status,
            elapsed_ms,
            "task finished"
        ),
    }
}
