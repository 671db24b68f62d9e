//! Status command - task counts per status.

use clap::Args;
use console::style;

use labelq_core::TaskStatus;

use super::{StoreArgs, infra_failure, load_config, open_store};

/// Arguments for the status command.
#[derive(Args)]
pub struct StatusArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Print counts as JSON
    #[arg(long)]
    json: bool,
}

pub async fn run(args: StatusArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);

    let store = open_store(&config)?;
    let counts = store.counts().map_err(infra_failure)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
        return Ok(());
    }

    println!("Task store: {}", config.store.db_path.display());
    println!();
    for status in [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Error,
    ] {
        let count = counts.get(status);
        let label = match status {
            TaskStatus::Done => style(status.as_str()).green(),
            TaskStatus::Failed => style(status.as_str()).yellow(),
            TaskStatus::Error => style(status.as_str()).red(),
            TaskStatus::Pending | TaskStatus::Processing => style(status.as_str()).cyan(),
        };
        println!("  {:<12} {:>8}", label, count);
    }
    println!("  {:<12} {:>8}", "total", counts.total());

    Ok(())
}
