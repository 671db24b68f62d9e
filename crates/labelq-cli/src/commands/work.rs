//! Work command - process tasks from the task store.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use labelq_core::PollingSource;

use super::{Pipeline, StoreArgs, load_config, open_store, run_worker};

/// Arguments for the work command.
#[derive(Args)]
pub struct WorkArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Exit once no pending task remains
    #[arg(long)]
    drain: bool,

    /// Seconds to sleep when nothing is claimable
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Append results to a JSON Lines file
    #[arg(long, value_name = "PATH")]
    jsonl: Option<PathBuf>,

    /// Use embedded text only, never OCR
    #[arg(long)]
    no_ocr: bool,
}

pub async fn run(args: WorkArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);
    if args.drain {
        config.worker.drain = true;
    }
    if let Some(secs) = args.poll_interval {
        config.worker.poll_interval_secs = secs;
    }
    if let Some(path) = args.jsonl {
        config.output.jsonl_path = Some(path);
    }
    if args.no_ocr {
        config.ocr.enabled = false;
    }

    let store = open_store(&config)?;
    let pipeline = Pipeline::from_config(&config)?;

    info!(
        "Polling {} every {}s (drain: {})",
        config.store.db_path.display(),
        config.worker.poll_interval_secs,
        config.worker.drain
    );

    let source = PollingSource::new(store, &config.worker);
    run_worker(pipeline.worker(source).with_config(&config.worker)).await
}
