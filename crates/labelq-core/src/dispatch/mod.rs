//! Broker-backed dispatch channel.
//!
//! Producers publish one [`QueueMessage`] per document on a direct exchange,
//! routed by label type. Consumers subscribe to one label type's queue and
//! receive a single unacknowledged [`Delivery`] at a time.

#[cfg(feature = "amqp")]
mod amqp;
mod memory;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::models::task::{LabelType, QueueMessage};

/// Publish/subscribe access to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a persistent task message routed by `label_type`.
    async fn publish(&self, label_type: LabelType, document_path: &str) -> Result<(), BrokerError>;

    /// Start consuming the queue for `label_type`.
    async fn subscribe(&self, label_type: LabelType) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// A stream of deliveries from one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` once the queue was closed on
    /// purpose; a dropped connection is [`BrokerError::Closed`].
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError>;
}

/// One received message awaiting settlement.
pub struct Delivery {
    tag: u64,
    payload: Vec<u8>,
    redelivered: bool,
    handle: Settlement,
}

enum Settlement {
    Memory(memory::MemoryAck),
    #[cfg(feature = "amqp")]
    Amqp(lapin::acker::Acker),
}

impl Delivery {
    /// Broker-assigned delivery tag.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the broker delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Decode the payload as a task message.
    pub fn decode(&self) -> Result<QueueMessage, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Acknowledge: the message is done and will not be redelivered.
    pub async fn ack(self) -> Result<(), BrokerError> {
        match self.handle {
            Settlement::Memory(mut ack) => {
                ack.ack();
                Ok(())
            }
            #[cfg(feature = "amqp")]
            Settlement::Amqp(acker) => amqp::ack(acker).await,
        }
    }

    /// Negative-acknowledge with requeue.
    pub async fn reject(self) -> Result<(), BrokerError> {
        match self.handle {
            Settlement::Memory(mut ack) => {
                ack.requeue();
                Ok(())
            }
            #[cfg(feature = "amqp")]
            Settlement::Amqp(acker) => amqp::requeue(acker).await,
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Encode a task message for publishing.
pub(crate) fn encode(label_type: LabelType, document_path: &str) -> Result<Vec<u8>, BrokerError> {
    Ok(serde_json::to_vec(&QueueMessage::new(document_path, label_type))?)
}
