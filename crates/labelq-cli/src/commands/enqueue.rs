//! Enqueue command - add documents to the task store.

use clap::Args;
use console::style;
use tracing::info;

use labelq_core::{Enqueued, LabelType};

use super::{StoreArgs, expand_inputs, infra_failure, load_config, open_store};

/// Arguments for the enqueue command.
#[derive(Args)]
pub struct EnqueueArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Document files or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Label type of every document (shipping, return, product)
    #[arg(short, long)]
    label_type: LabelType,
}

pub async fn run(args: EnqueueArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);

    let store = open_store(&config)?;
    let paths = expand_inputs(&args.inputs)?;

    let mut created = 0;
    let mut existing = 0;
    for path in &paths {
        match store.enqueue(path, args.label_type).map_err(infra_failure)? {
            Enqueued::Created(id) => {
                info!("Task {} created for {}", id, path.display());
                created += 1;
            }
            Enqueued::Existing => {
                info!("{} is already queued", path.display());
                existing += 1;
            }
        }
    }

    println!(
        "{} Enqueued {} {} tasks ({} already queued)",
        style("✓").green(),
        created,
        args.label_type,
        existing
    );
    Ok(())
}
