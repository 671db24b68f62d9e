//! End-to-end tests: store or broker -> text extraction -> field extraction -> sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use labelq_core::error::ServiceError;
use labelq_core::models::config::{ServiceConfig, WorkerConfig};
use labelq_core::{
    Broker, ChannelSource, Enqueued, ExtractedFields, ExtractionService, FieldExtractionClient,
    LabelType, MemoryBroker, PollingSource, ResultSink, SqliteTaskStore, Task, TaskStatus,
    TextExtractor, Worker,
};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::watch;

const SHIPPING_REPLY: &str = r#"{"tracking_number":"SPX123","sender_address":"Not found","recipient_address":"Not found","delivery_date":"Not found"}"#;

/// One-page PDF showing `text` in Courier.
fn label_pdf(text: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 18.into()]),
            Operation::new("Td", vec![50.into(), 750.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Replays replies in order and records call times and inputs.
struct ScriptedService {
    replies: Mutex<Vec<Result<String, ServiceError>>>,
    calls: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedService {
    fn new(mut replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ExtractionService for ScriptedService {
    async fn generate(&self, _instruction: &str, text: &str) -> Result<String, ServiceError> {
        self.calls.lock().push((Instant::now(), text.to_string()));
        self.replies
            .lock()
            .pop()
            .unwrap_or_else(|| Err(ServiceError::EmptyResponse("script exhausted".into())))
    }
}

#[derive(Default)]
struct CollectSink(Mutex<Vec<(PathBuf, ExtractedFields)>>);

impl ResultSink for CollectSink {
    fn emit(&self, task: &Task, fields: &ExtractedFields) -> labelq_core::Result<()> {
        self.0.lock().push((task.document_path.clone(), fields.clone()));
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    root: PathBuf,
    store: SqliteTaskStore,
    service: Arc<ScriptedService>,
    sink: Arc<CollectSink>,
}

impl Harness {
    fn new(replies: Vec<Result<String, ServiceError>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let store = SqliteTaskStore::open(&root.join("tasks.db")).unwrap();
        Self {
            _dir: dir,
            root,
            store,
            service: ScriptedService::new(replies),
            sink: Arc::new(CollectSink::default()),
        }
    }

    fn write_pdf(&self, name: &str, text: &str) -> PathBuf {
        let path = self.root.join(name);
        std::fs::write(&path, label_pdf(text)).unwrap();
        path
    }

    fn client(&self) -> FieldExtractionClient {
        let config = ServiceConfig {
            base_delay_ms: 25,
            max_delay_ms: 1_000,
            jitter: false,
            ..ServiceConfig::default()
        };
        FieldExtractionClient::new(self.service.clone(), &config)
    }

    async fn drain(&self) -> labelq_core::RunSummary {
        let config = WorkerConfig {
            drain: true,
            ..WorkerConfig::default()
        };
        let source = PollingSource::new(self.store.clone(), &config);
        let mut worker = Worker::new(
            source,
            Arc::new(TextExtractor::native_only()),
            self.client(),
            self.sink.clone(),
        )
        .with_config(&config);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        worker.run(shutdown_rx).await.unwrap()
    }

    fn status_of(&self, enqueued: Enqueued) -> TaskStatus {
        let Enqueued::Created(id) = enqueued else {
            panic!("expected a new task");
        };
        self.store.get(id).unwrap().unwrap().status
    }
}

#[tokio::test]
async fn shipping_label_ends_done_with_fields_forwarded() {
    let harness = Harness::new(vec![Ok(SHIPPING_REPLY.to_string())]);
    let path = harness.write_pdf("sample_shipping.pdf", "Tracking No. SPX123");
    let enqueued = harness.store.enqueue(&path, LabelType::Shipping).unwrap();

    let summary = harness.drain().await;

    assert_eq!(summary.done, 1);
    assert_eq!(harness.status_of(enqueued), TaskStatus::Done);

    let calls = harness.service.calls.lock();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.contains("SPX123"));

    let results = harness.sink.0.lock();
    assert_eq!(results.len(), 1);
    let (emitted_path, fields) = &results[0];
    assert_eq!(emitted_path, &path);
    let expected: ExtractedFields = serde_json::from_str(SHIPPING_REPLY).unwrap();
    assert_eq!(fields, &expected);
    assert_eq!(serde_json::to_string(fields).unwrap(), SHIPPING_REPLY);
}

#[tokio::test]
async fn missing_document_ends_error_without_service_call() {
    let harness = Harness::new(vec![Ok(SHIPPING_REPLY.to_string())]);
    let enqueued = harness
        .store
        .enqueue(Path::new("/nonexistent/label.pdf"), LabelType::Shipping)
        .unwrap();

    let summary = harness.drain().await;

    assert_eq!(summary.error, 1);
    assert_eq!(harness.status_of(enqueued), TaskStatus::Error);
    assert!(harness.service.calls.lock().is_empty());
    assert!(harness.sink.0.lock().is_empty());
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let harness = Harness::new(vec![
        Err(ServiceError::Http {
            status: 503,
            body: "unavailable".into(),
        }),
        Err(ServiceError::Transport("timed out".into())),
        Ok(SHIPPING_REPLY.to_string()),
    ]);
    let path = harness.write_pdf("retry.pdf", "Tracking No. SPX123");
    let enqueued = harness.store.enqueue(&path, LabelType::Shipping).unwrap();

    harness.drain().await;

    assert_eq!(harness.status_of(enqueued), TaskStatus::Done);
    assert_eq!(harness.sink.0.lock().len(), 1);

    let calls = harness.service.calls.lock();
    assert_eq!(calls.len(), 3);
    assert!(calls[1].0 - calls[0].0 >= Duration::from_millis(25));
    assert!(calls[2].0 - calls[1].0 >= Duration::from_millis(50));
}

#[tokio::test]
async fn prose_reply_ends_failed_not_error() {
    let harness = Harness::new(vec![Ok("Here is what I found on the label.".to_string())]);
    let path = harness.write_pdf("prose.pdf", "Return ID R-77");
    let enqueued = harness.store.enqueue(&path, LabelType::Return).unwrap();

    let summary = harness.drain().await;

    assert_eq!(summary.failed, 1);
    assert_eq!(harness.status_of(enqueued), TaskStatus::Failed);
    assert!(harness.sink.0.lock().is_empty());
}

#[tokio::test]
async fn duplicate_enqueue_processes_once() {
    let harness = Harness::new(vec![Ok(SHIPPING_REPLY.to_string()), Ok(SHIPPING_REPLY.to_string())]);
    let path = harness.write_pdf("dup.pdf", "Tracking No. SPX123");
    harness.store.enqueue(&path, LabelType::Shipping).unwrap();
    assert_eq!(
        harness.store.enqueue(&path, LabelType::Shipping).unwrap(),
        Enqueued::Existing
    );

    let summary = harness.drain().await;
    assert_eq!(summary.total(), 1);
    assert_eq!(harness.service.calls.lock().len(), 1);
}

#[tokio::test]
async fn broker_messages_are_acked_after_completion() {
    let harness = Harness::new(vec![Ok(SHIPPING_REPLY.to_string())]);
    let good = harness.write_pdf("queued.pdf", "Tracking No. SPX123");

    let broker = MemoryBroker::new();
    broker
        .publish(LabelType::Shipping, &good.to_string_lossy())
        .await
        .unwrap();
    broker
        .publish(LabelType::Shipping, "/nonexistent/queued.pdf")
        .await
        .unwrap();
    let subscription = broker.subscribe(LabelType::Shipping).await.unwrap();
    broker.close();

    let mut worker = Worker::new(
        ChannelSource::new(subscription, LabelType::Shipping),
        Arc::new(TextExtractor::native_only()),
        harness.client(),
        harness.sink.clone(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let summary = worker.run(shutdown_rx).await.unwrap();

    assert_eq!(summary.done, 1);
    assert_eq!(summary.error, 1);
    assert_eq!(broker.queued(LabelType::Shipping), 0);
    assert_eq!(harness.sink.0.lock()[0].0, good);
}
