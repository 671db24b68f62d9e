//! Core library for the label extraction pipeline.
//!
//! This crate provides:
//! - Text extraction from label documents (embedded PDF text, OCR fallback)
//! - Structured field extraction through an external language model
//! - A durable SQLite task store with atomic claims and lease recovery
//! - A broker-backed dispatch channel (AMQP or in-memory)
//! - The worker loop that drives each task to a terminal status

pub mod dispatch;
pub mod error;
pub mod fields;
pub mod models;
pub mod ocr;
pub mod pdf;
pub mod sink;
pub mod source;
pub mod store;
pub mod text;
pub mod worker;

pub use dispatch::{Broker, Delivery, MemoryBroker, Subscription};
#[cfg(feature = "amqp")]
pub use dispatch::AmqpBroker;
pub use error::{InfraError, LabelqError, Result};
pub use fields::{ExtractionService, FieldExtractionClient, GeminiService, Unavailable};
pub use models::config::LabelqConfig;
pub use models::task::{ExtractedFields, LabelType, QueueMessage, Task, TaskId, TaskStatus};
pub use sink::{FanoutSink, JsonlSink, LogSink, ResultSink};
pub use source::{ChannelSource, Completion, Next, PollingSource, TaskSource};
pub use store::{Enqueued, SqliteTaskStore, StatusCounts, SweepReport};
pub use text::{DocumentReader, TextExtraction, TextExtractor, TextSource};
pub use worker::{RunSummary, TaskOutcome, Worker};
