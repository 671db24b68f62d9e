//! Consume command - process tasks from a broker queue.

use clap::Args;

use labelq_core::LabelType;

/// Arguments for the consume command.
#[derive(Args)]
pub struct ConsumeArgs {
    /// Queue to consume (shipping, return, product)
    #[arg(short, long)]
    label_type: LabelType,

    /// Broker host (overrides config and MESSAGE_QUEUE_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Use embedded text only, never OCR
    #[arg(long)]
    no_ocr: bool,
}

#[cfg(feature = "amqp")]
pub async fn run(args: ConsumeArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    use labelq_core::{AmqpBroker, Broker, ChannelSource};

    use super::{Pipeline, infra_failure, load_config, run_worker};

    let mut config = load_config(config_path)?;
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if args.no_ocr {
        config.ocr.enabled = false;
    }

    let pipeline = Pipeline::from_config(&config)?;
    let broker = AmqpBroker::connect(&config.broker)
        .await
        .map_err(infra_failure)?;
    let subscription = broker
        .subscribe(args.label_type)
        .await
        .map_err(infra_failure)?;

    let source = ChannelSource::new(subscription, args.label_type);
    run_worker(pipeline.worker(source)).await
}

#[cfg(not(feature = "amqp"))]
pub async fn run(args: ConsumeArgs, _config_path: Option<&str>) -> anyhow::Result<()> {
    anyhow::bail!(
        "Cannot consume {} queue: labelq was built without the amqp feature",
        args.label_type
    )
}
