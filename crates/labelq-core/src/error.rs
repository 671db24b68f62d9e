//! Error types for the labelq-core library.

use thiserror::Error;

use crate::models::task::{TaskId, TaskStatus};

/// Main error type for the labelq library.
#[derive(Error, Debug)]
pub enum LabelqError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR processing error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Extraction service error.
    #[error("extraction service error: {0}")]
    Service(#[from] ServiceError),

    /// Task store or broker failure.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Invalid page number requested.
    #[error("invalid page number: {0}")]
    InvalidPage(u32),

    /// The document could not be read from disk.
    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Rendering pages to images failed.
    #[error("page rendering failed: {0}")]
    Render(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// An external OCR tool could not be started or exited unsuccessfully.
    #[error("{tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    /// Invalid image format or dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Errors returned by the extraction service transport.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Network-level failure (connect, timeout, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The service answered but carried no text candidate.
    #[error("empty response: {0}")]
    EmptyResponse(String),

    /// The service envelope could not be decoded.
    #[error("failed to decode service response: {0}")]
    Decode(String),

    /// The client is missing credentials or endpoint settings.
    #[error("service not configured: {0}")]
    NotConfigured(String),
}

impl ServiceError {
    /// Whether a retry of the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Transport(_) => true,
            ServiceError::Http { status, .. } => {
                matches!(*status, 408 | 429) || (500..=599).contains(status)
            }
            ServiceError::EmptyResponse(_)
            | ServiceError::Decode(_)
            | ServiceError::NotConfigured(_) => false,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            ServiceError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            ServiceError::Decode(err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

/// Reasons the field extraction client could not produce fields.
#[derive(Error, Debug)]
pub enum Unavailable {
    /// Input text was empty; no request was sent.
    #[error("document text is empty")]
    EmptyInput,

    /// The service kept failing or failed permanently.
    #[error("extraction service unavailable: {0}")]
    Service(#[from] ServiceError),

    /// The response was not a flat JSON object of strings.
    #[error("malformed extraction response: {0}")]
    Malformed(String),
}

/// Errors raised by the task store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No task with this id.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// Requested status change violates the lifecycle.
    #[error("task {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The claim's lease expired and the task was handed on.
    #[error("task {id}: claim {claim} no longer holds the task")]
    LeaseLost { id: TaskId, claim: u32 },
}

/// Errors raised by the message broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Could not connect or the connection dropped.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// Channel-level failure (declare, publish, ack).
    #[error("broker protocol error: {0}")]
    Protocol(String),

    /// The broker stopped delivering (connection or channel lost).
    #[error("broker channel closed")]
    Closed,

    /// A message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(feature = "amqp")]
impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::IOError(_) | lapin::Error::InvalidConnectionState(_) => {
                BrokerError::Connection(err.to_string())
            }
            other => BrokerError::Protocol(other.to_string()),
        }
    }
}

/// Failure to reach the task store or the dispatch channel.
///
/// Fatal to a worker process, unlike per-task errors.
#[derive(Error, Debug)]
pub enum InfraError {
    /// Task store failure.
    #[error("task store failure: {0}")]
    Store(#[from] StoreError),

    /// Broker failure.
    #[error("dispatch channel failure: {0}")]
    Broker(#[from] BrokerError),
}

/// Result type for the labelq library.
pub type Result<T> = std::result::Result<T, LabelqError>;
