//! Where the worker gets its tasks from.
//!
//! [`PollingSource`] claims rows from the task store; [`ChannelSource`]
//! consumes broker deliveries. The worker loop is the same for both.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dispatch::{Delivery, Subscription};
use crate::error::{BrokerError, InfraError, StoreError};
use crate::models::config::WorkerConfig;
use crate::models::task::{LabelType, Task, TaskId, TaskStatus};
use crate::store::SqliteTaskStore;

/// Result of asking a source for work.
#[derive(Debug)]
pub enum Next {
    /// A claimed task, already in `processing`.
    Task(Task),
    /// Nothing claimable right now.
    Idle { pending: u64 },
    /// The source will never produce another task.
    Closed,
}

/// What became of a result passed to [`TaskSource::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The terminal status was recorded.
    Recorded,
    /// The task was handed to another claim; the result was dropped.
    LeaseLost,
}

/// A supply of tasks plus the means to settle them.
#[async_trait]
pub trait TaskSource: Send {
    async fn next(&mut self) -> Result<Next, InfraError>;

    /// Record the terminal status of a task obtained from `next`.
    async fn complete(&mut self, task: &Task, status: TaskStatus) -> Result<Completion, InfraError>;

    /// Give a task back without finishing it (shutdown).
    async fn abandon(&mut self, task: &Task) -> Result<(), InfraError>;
}

/// Claims tasks from the SQLite store and runs the lease sweeper.
pub struct PollingSource {
    store: SqliteTaskStore,
    lease: Duration,
    sweep_interval: Duration,
    max_claims: u32,
    last_sweep: Option<Instant>,
}

impl PollingSource {
    pub fn new(store: SqliteTaskStore, config: &WorkerConfig) -> Self {
        Self {
            store,
            lease: config.lease(),
            sweep_interval: config.sweep_interval(),
            max_claims: config.max_claims,
            last_sweep: None,
        }
    }

    fn sweep_if_due(&mut self) -> Result<(), StoreError> {
        let due = self
            .last_sweep
            .is_none_or(|last| last.elapsed() >= self.sweep_interval);
        if due {
            self.store.requeue_expired(Utc::now(), self.max_claims)?;
            self.last_sweep = Some(Instant::now());
        }
        Ok(())
    }
}

#[async_trait]
impl TaskSource for PollingSource {
    async fn next(&mut self) -> Result<Next, InfraError> {
        self.sweep_if_due()?;
        match self.store.claim_next_pending(self.lease)? {
            Some(task) => Ok(Next::Task(task)),
            None => Ok(Next::Idle {
                pending: self.store.count_pending()?,
            }),
        }
    }

    async fn complete(&mut self, task: &Task, status: TaskStatus) -> Result<Completion, InfraError> {
        match self.store.complete(task, status) {
            Ok(()) => Ok(Completion::Recorded),
            Err(StoreError::LeaseLost { claim, .. }) => {
                warn!(
                    "Lease of task {} (claim {}) expired while processing; dropping result {}",
                    task.id, claim, status
                );
                Ok(Completion::LeaseLost)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn abandon(&mut self, task: &Task) -> Result<(), InfraError> {
        info!("Leaving task {} in processing until its lease expires", task.id);
        Ok(())
    }
}

/// Consumes one label type's queue from a broker.
///
/// Task ids are delivery tags. Nothing is written to the task store.
pub struct ChannelSource {
    subscription: Box<dyn Subscription>,
    label_type: LabelType,
    in_flight: Option<Delivery>,
}

impl ChannelSource {
    pub fn new(subscription: Box<dyn Subscription>, label_type: LabelType) -> Self {
        Self {
            subscription,
            label_type,
            in_flight: None,
        }
    }

    fn settle(&mut self, task: &Task) -> Result<Delivery, InfraError> {
        match self.in_flight.take() {
            Some(delivery) if delivery.tag() as i64 == task.id.0 => Ok(delivery),
            Some(other) => {
                let tag = other.tag();
                self.in_flight = Some(other);
                Err(BrokerError::Protocol(format!(
                    "task {} does not match in-flight delivery {}",
                    task.id, tag
                ))
                .into())
            }
            None => Err(BrokerError::Protocol(format!("no in-flight delivery for task {}", task.id)).into()),
        }
    }
}

#[async_trait]
impl TaskSource for ChannelSource {
    async fn next(&mut self) -> Result<Next, InfraError> {
        loop {
            let Some(delivery) = self.subscription.next_delivery().await? else {
                return Ok(Next::Closed);
            };

            let message = match delivery.decode() {
                Ok(message) => message,
                Err(e) => {
                    warn!(
                        "Discarding undecodable message {} ({}): {:?}",
                        delivery.tag(),
                        e,
                        String::from_utf8_lossy(delivery.payload())
                    );
                    delivery.ack().await?;
                    continue;
                }
            };

            let task = Task {
                id: TaskId(delivery.tag() as i64),
                document_path: PathBuf::from(&message.file_path),
                label_type: message.label_type.unwrap_or(self.label_type),
                status: TaskStatus::Processing,
                created_at: Utc::now(),
                claim: 0,
            };
            if delivery.redelivered() {
                debug!("Redelivery of {}", message.file_path);
            }
            self.in_flight = Some(delivery);
            return Ok(Next::Task(task));
        }
    }

    async fn complete(&mut self, task: &Task, _status: TaskStatus) -> Result<Completion, InfraError> {
        self.settle(task)?.ack().await?;
        Ok(Completion::Recorded)
    }

    async fn abandon(&mut self, task: &Task) -> Result<(), InfraError> {
        self.settle(task)?.reject().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Broker, MemoryBroker};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[tokio::test]
    async fn test_polling_source_claims_then_idles() {
        let store = SqliteTaskStore::in_memory().unwrap();
        store.enqueue(Path::new("/in/a.pdf"), LabelType::Shipping).unwrap();
        let mut source = PollingSource::new(store.clone(), &WorkerConfig::default());

        let Next::Task(task) = source.next().await.unwrap() else {
            panic!("expected a task");
        };
        assert_eq!(task.status, TaskStatus::Processing);
        assert!(matches!(source.next().await.unwrap(), Next::Idle { pending: 0 }));

        assert_eq!(
            source.complete(&task, TaskStatus::Done).await.unwrap(),
            Completion::Recorded
        );
        assert_eq!(store.get(task.id).unwrap().unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_polling_source_sweeps_expired_leases() {
        let store = SqliteTaskStore::in_memory().unwrap();
        store.enqueue(Path::new("/in/a.pdf"), LabelType::Shipping).unwrap();
        let config = WorkerConfig {
            lease_secs: 0,
            sweep_interval_secs: 0,
            ..WorkerConfig::default()
        };
        let mut source = PollingSource::new(store.clone(), &config);

        let Next::Task(first) = source.next().await.unwrap() else {
            panic!("expected a task");
        };
        // Simulated crash: the task is never completed.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let Next::Task(second) = source.next().await.unwrap() else {
            panic!("expected the task to be requeued");
        };
        assert_eq!(first.id, second.id);

        // The first claim's late result must not land on the second.
        assert_eq!(
            source.complete(&first, TaskStatus::Failed).await.unwrap(),
            Completion::LeaseLost
        );
        assert_eq!(store.get(first.id).unwrap().unwrap().status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn test_channel_source_defaults_label_and_acks() {
        let broker = MemoryBroker::new();
        broker.publish(LabelType::Return, "/in/r.pdf").await.unwrap();
        let mut source = ChannelSource::new(
            broker.subscribe(LabelType::Return).await.unwrap(),
            LabelType::Return,
        );

        let Next::Task(task) = source.next().await.unwrap() else {
            panic!("expected a task");
        };
        assert_eq!(task.label_type, LabelType::Return);
        assert_eq!(task.document_path, PathBuf::from("/in/r.pdf"));

        assert_eq!(
            source.complete(&task, TaskStatus::Failed).await.unwrap(),
            Completion::Recorded
        );
        broker.close();
        assert!(matches!(source.next().await.unwrap(), Next::Closed));
        assert_eq!(broker.queued(LabelType::Return), 0);
    }

    /// A subscription whose connection has dropped.
    struct Disconnected;

    #[async_trait]
    impl Subscription for Disconnected {
        async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
            Err(BrokerError::Closed)
        }
    }

    #[tokio::test]
    async fn test_channel_source_surfaces_lost_connection() {
        let mut source = ChannelSource::new(Box::new(Disconnected), LabelType::Product);
        assert!(matches!(
            source.next().await,
            Err(InfraError::Broker(BrokerError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_channel_source_abandon_requeues() {
        let broker = MemoryBroker::new();
        broker.publish(LabelType::Shipping, "/in/s.pdf").await.unwrap();
        let mut source = ChannelSource::new(
            broker.subscribe(LabelType::Shipping).await.unwrap(),
            LabelType::Shipping,
        );

        let Next::Task(task) = source.next().await.unwrap() else {
            panic!("expected a task");
        };
        source.abandon(&task).await.unwrap();
        assert_eq!(broker.queued(LabelType::Shipping), 1);
    }
}
