//! In-process broker.
//!
//! Mirrors the AMQP semantics the worker relies on: one queue per label type,
//! at-least-once delivery, and unsettled deliveries returning to the head of
//! their queue when rejected or dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::{Broker, Delivery, Settlement, Subscription, encode};
use crate::error::BrokerError;
use crate::models::task::LabelType;

#[derive(Default)]
struct MemoryQueue {
    /// (payload, redelivered)
    messages: Mutex<VecDeque<(Vec<u8>, bool)>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryQueue {
    fn push_back(&self, payload: Vec<u8>) {
        self.messages.lock().push_back((payload, false));
        self.notify.notify_one();
    }

    fn push_front(&self, payload: Vec<u8>) {
        self.messages.lock().push_front((payload, true));
        self.notify.notify_one();
    }
}

/// Broker living in this process.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<LabelType, Arc<MemoryQueue>>>>,
    next_tag: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, label_type: LabelType) -> Arc<MemoryQueue> {
        Arc::clone(self.queues.lock().entry(label_type).or_default())
    }

    /// Messages waiting in the queue for `label_type` (not counting unsettled ones).
    pub fn queued(&self, label_type: LabelType) -> usize {
        self.queue(label_type).messages.lock().len()
    }

    /// Close every queue. Subscribers drain what is left, then see the end.
    pub fn close(&self) {
        for queue in self.queues.lock().values() {
            queue.closed.store(true, Ordering::SeqCst);
            queue.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, label_type: LabelType, document_path: &str) -> Result<(), BrokerError> {
        let payload = encode(label_type, document_path)?;
        self.queue(label_type).push_back(payload);
        debug!("Published {} to {}", document_path, label_type.queue_name());
        Ok(())
    }

    async fn subscribe(&self, label_type: LabelType) -> Result<Box<dyn Subscription>, BrokerError> {
        Ok(Box::new(MemorySubscription {
            queue: self.queue(label_type),
            next_tag: Arc::clone(&self.next_tag),
        }))
    }
}

struct MemorySubscription {
    queue: Arc<MemoryQueue>,
    next_tag: Arc<AtomicU64>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            let notified = self.queue.notify.notified();

            if let Some((payload, redelivered)) = self.queue.messages.lock().pop_front() {
                let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
                return Ok(Some(Delivery {
                    tag,
                    payload: payload.clone(),
                    redelivered,
                    handle: Settlement::Memory(MemoryAck {
                        queue: Arc::clone(&self.queue),
                        payload: Some(payload),
                    }),
                }));
            }
            if self.queue.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            notified.await;
        }
    }
}

/// Settlement handle; requeues on drop unless acknowledged.
pub(super) struct MemoryAck {
    queue: Arc<MemoryQueue>,
    payload: Option<Vec<u8>>,
}

impl MemoryAck {
    pub(super) fn ack(&mut self) {
        self.payload = None;
    }

    pub(super) fn requeue(&mut self) {
        if let Some(payload) = self.payload.take() {
            self.queue.push_front(payload);
        }
    }
}

impl Drop for MemoryAck {
    fn drop(&mut self) {
        self.requeue();
    }
}
