//! Structured field extraction through an external language model.

mod client;
mod gemini;
pub mod prompt;
pub mod sanitize;

pub use crate::error::Unavailable;
pub use client::FieldExtractionClient;
pub use gemini::GeminiService;

use async_trait::async_trait;

use crate::error::ServiceError;

/// A text-in, text-out extraction backend.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Send `instruction` followed by the document `text`; return the raw reply.
    async fn generate(&self, instruction: &str, text: &str) -> Result<String, ServiceError>;
}
