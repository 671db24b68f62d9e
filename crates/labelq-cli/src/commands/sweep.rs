//! Sweep command - requeue tasks whose lease expired.

use chrono::Utc;
use clap::Args;
use console::style;

use super::{StoreArgs, infra_failure, load_config, open_store};

/// Arguments for the sweep command.
#[derive(Args)]
pub struct SweepArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Claims after which an expired task becomes `error`
    #[arg(long)]
    max_claims: Option<u32>,
}

pub async fn run(args: SweepArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.store.apply(&mut config);
    let max_claims = args.max_claims.unwrap_or(config.worker.max_claims);

    let store = open_store(&config)?;
    let report = store
        .requeue_expired(Utc::now(), max_claims)
        .map_err(infra_failure)?;

    println!(
        "{} Requeued {} tasks, gave up on {}",
        style("✓").green(),
        report.requeued,
        report.abandoned
    );
    Ok(())
}
