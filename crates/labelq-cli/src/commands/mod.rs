//! Subcommands and the plumbing they share.

pub mod config;
pub mod consume;
pub mod enqueue;
pub mod extract;
pub mod publish;
pub mod status;
pub mod sweep;
pub mod work;

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use glob::glob;
use tokio::sync::watch;
use tracing::{error, info, warn};

use labelq_core::models::config::LabelqConfig;
use labelq_core::{
    DocumentReader, FanoutSink, FieldExtractionClient, JsonlSink, LogSink, ResultSink,
    SqliteTaskStore, TaskSource, TextExtractor, Worker,
};

/// Task store location override shared by the store-backed commands.
#[derive(Args)]
pub struct StoreArgs {
    /// Task database file (overrides config and LABELQ_DB_PATH)
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,
}

impl StoreArgs {
    pub fn apply(&self, config: &mut LabelqConfig) {
        if let Some(db) = &self.db {
            config.store.db_path = db.clone();
        }
    }
}

/// Load the config file (explicit or per-user), then apply the environment.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<LabelqConfig> {
    let mut config = match config_path {
        Some(path) => LabelqConfig::from_file(Path::new(path))
            .with_context(|| format!("Failed to read config file {}", path))?,
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                LabelqConfig::from_file(&default_path)
                    .with_context(|| format!("Failed to read config file {}", default_path.display()))?
            } else {
                LabelqConfig::default()
            }
        }
    };
    config.apply_env();
    Ok(config)
}

/// Log a store or broker failure and turn it into the command's error.
pub fn infra_failure(err: impl Display) -> anyhow::Error {
    error!("infrastructure failure: {}", err);
    anyhow::anyhow!("infrastructure failure: {}", err)
}

pub fn open_store(config: &LabelqConfig) -> anyhow::Result<SqliteTaskStore> {
    SqliteTaskStore::from_config(&config.store).map_err(infra_failure)
}

/// Expand each input as a glob pattern; inputs matching nothing are kept as given.
pub fn expand_inputs(inputs: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        let matches: Vec<PathBuf> = glob(input)
            .with_context(|| format!("Invalid pattern: {}", input))?
            .filter_map(|r| r.ok())
            .collect();

        if matches.is_empty() {
            warn!("{} matches no file; passing it through as-is", input);
            paths.push(PathBuf::from(input));
        } else {
            paths.extend(matches);
        }
    }

    // Workers may run elsewhere; hand them absolute paths.
    paths
        .into_iter()
        .map(|p| std::path::absolute(&p).with_context(|| format!("Cannot resolve {}", p.display())))
        .collect()
}

/// Text reader, extraction client and result sink for a worker.
pub struct Pipeline {
    pub reader: Arc<dyn DocumentReader>,
    pub client: FieldExtractionClient,
    pub sink: Arc<dyn ResultSink>,
}

impl Pipeline {
    pub fn from_config(config: &LabelqConfig) -> anyhow::Result<Self> {
        let reader = TextExtractor::from_config(&config.ocr).context("Failed to set up OCR")?;
        let client = FieldExtractionClient::from_config(&config.service)
            .context("Failed to set up the extraction service (is GEMINI_API_KEY set?)")?;

        let mut sink = FanoutSink::new().with(LogSink);
        if let Some(path) = &config.output.jsonl_path {
            let jsonl = JsonlSink::open(path)
                .with_context(|| format!("Cannot open result file {}", path.display()))?;
            info!("Appending results to {}", jsonl.path().display());
            sink = sink.with(jsonl);
        }

        Ok(Self {
            reader: Arc::new(reader),
            client,
            sink: Arc::new(sink),
        })
    }

    pub fn worker<S: TaskSource>(self, source: S) -> Worker<S> {
        Worker::new(source, self.reader, self.client, self.sink)
    }
}

/// Run `worker` until it stops on its own or Ctrl-C arrives.
pub async fn run_worker<S: TaskSource>(mut worker: Worker<S>) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = worker.run(shutdown_rx).await.map_err(infra_failure)?;

    println!(
        "{} Processed {} tasks: {} done, {} failed, {} error",
        style("✓").green(),
        summary.total(),
        summary.done,
        summary.failed,
        summary.error
    );
    Ok(())
}
