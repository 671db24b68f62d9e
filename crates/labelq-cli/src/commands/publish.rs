//! Publish command - send documents to a broker queue.

use clap::Args;

use labelq_core::LabelType;

/// Arguments for the publish command.
#[derive(Args)]
pub struct PublishArgs {
    /// Document files or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Label type, also the routing key (shipping, return, product)
    #[arg(short, long)]
    label_type: LabelType,

    /// Broker host (overrides config and MESSAGE_QUEUE_HOST)
    #[arg(long)]
    host: Option<String>,
}

#[cfg(feature = "amqp")]
pub async fn run(args: PublishArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    use console::style;
    use labelq_core::{AmqpBroker, Broker};

    use super::{expand_inputs, infra_failure, load_config};

    let mut config = load_config(config_path)?;
    if let Some(host) = args.host {
        config.broker.host = host;
    }

    let paths = expand_inputs(&args.inputs)?;
    let broker = AmqpBroker::connect(&config.broker)
        .await
        .map_err(infra_failure)?;

    for path in &paths {
        broker
            .publish(args.label_type, &path.to_string_lossy())
            .await
            .map_err(infra_failure)?;
    }

    println!(
        "{} Published {} documents to {}",
        style("✓").green(),
        paths.len(),
        args.label_type.queue_name()
    );
    Ok(())
}

#[cfg(not(feature = "amqp"))]
pub async fn run(args: PublishArgs, _config_path: Option<&str>) -> anyhow::Result<()> {
    anyhow::bail!(
        "Cannot publish to {}: labelq was built without the amqp feature",
        args.label_type.queue_name()
    )
}
