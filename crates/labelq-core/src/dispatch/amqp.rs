//! AMQP 0-9-1 broker (RabbitMQ) via lapin.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{debug, info};

use super::{Broker, Delivery, Settlement, Subscription, encode};
use crate::error::BrokerError;
use crate::models::config::BrokerConfig;
use crate::models::task::LabelType;

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Connection to an AMQP broker with the task exchange declared.
pub struct AmqpBroker {
    // Closing the connection closes the channel; keep it alive with the broker.
    _connection: Connection,
    channel: Channel,
    exchange: String,
}

impl AmqpBroker {
    /// Connect and declare the durable direct exchange.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let connection =
            Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
                .await
                .map_err(|e| BrokerError::Connection(format!("{}:{}: {}", config.host, config.port, e)))?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(
            "Connected to AMQP broker at {}:{} (exchange {})",
            config.host, config.port, config.exchange
        );

        Ok(Self {
            _connection: connection,
            channel,
            exchange: config.exchange.clone(),
        })
    }

    /// Declare the durable queue for `label_type` and bind it to the exchange.
    async fn declare_queue(&self, label_type: LabelType) -> Result<String, BrokerError> {
        let queue = label_type.queue_name();
        self.channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        self.channel
            .queue_bind(
                &queue,
                &self.exchange,
                label_type.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(queue)
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn publish(&self, label_type: LabelType, document_path: &str) -> Result<(), BrokerError> {
        // A direct exchange drops messages whose routing key has no bound queue.
        self.declare_queue(label_type).await?;

        let payload = encode(label_type, document_path)?;
        self.channel
            .basic_publish(
                &self.exchange,
                label_type.as_str(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        debug!("Published {} with routing key {}", document_path, label_type);
        Ok(())
    }

    async fn subscribe(&self, label_type: LabelType) -> Result<Box<dyn Subscription>, BrokerError> {
        let queue = self.declare_queue(label_type).await?;
        self.channel.basic_qos(1, BasicQosOptions::default()).await?;

        let consumer = self
            .channel
            .basic_consume(
                &queue,
                &format!("labelq-{}-{}", label_type, std::process::id()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("Consuming {} with prefetch 1", queue);
        Ok(Box::new(AmqpSubscription { consumer }))
    }
}

struct AmqpSubscription {
    consumer: Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        match self.consumer.next().await {
            // A live AMQP consumer never ends on its own.
            None => Err(BrokerError::Closed),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(delivery)) => Ok(Some(Delivery {
                tag: delivery.delivery_tag,
                payload: delivery.data,
                redelivered: delivery.redelivered,
                handle: Settlement::Amqp(delivery.acker),
            })),
        }
    }
}

pub(super) async fn ack(acker: Acker) -> Result<(), BrokerError> {
    acker.ack(BasicAckOptions::default()).await?;
    Ok(())
}

pub(super) async fn requeue(acker: Acker) -> Result<(), BrokerError> {
    acker
        .nack(BasicNackOptions {
            requeue: true,
            ..BasicNackOptions::default()
        })
        .await?;
    Ok(())
}
