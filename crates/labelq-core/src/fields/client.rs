//! Field extraction with retry and response validation.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{debug, warn};

use super::{ExtractionService, GeminiService, prompt, sanitize};
use crate::error::{ServiceError, Unavailable};
use crate::models::config::ServiceConfig;
use crate::models::task::{ExtractedFields, LabelType};

/// Turns document text into [`ExtractedFields`].
///
/// Holds no mutable state; clones share the underlying service.
#[derive(Clone)]
pub struct FieldExtractionClient {
    service: Arc<dyn ExtractionService>,
    backoff: ExponentialBuilder,
}

impl FieldExtractionClient {
    /// Wrap `service`, retrying transient errors as configured.
    pub fn new(service: Arc<dyn ExtractionService>, config: &ServiceConfig) -> Self {
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(config.base_delay())
            .with_max_delay(config.max_delay())
            .with_factor(2.0)
            .with_max_times(config.max_attempts.saturating_sub(1));
        if config.jitter {
            backoff = backoff.with_jitter();
        }
        Self { service, backoff }
    }

    /// Client talking to Gemini.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let service = GeminiService::from_config(config)?;
        Ok(Self::new(Arc::new(service), config))
    }

    /// Extract the fields for `label_type` from `text`.
    ///
    /// Blank text returns [`Unavailable::EmptyInput`] without calling the
    /// service. The returned mapping is exactly what the service produced.
    pub async fn extract_fields(
        &self,
        text: &str,
        label_type: LabelType,
    ) -> Result<ExtractedFields, Unavailable> {
        if text.trim().is_empty() {
            return Err(Unavailable::EmptyInput);
        }

        let instruction = prompt::instruction(label_type);
        let call = || async { self.service.generate(&instruction, text).await };

        let raw = call
            .retry(self.backoff)
            .sleep(tokio::time::sleep)
            .when(|err: &ServiceError| err.is_transient())
            .notify(|err: &ServiceError, delay: Duration| {
                warn!(
                    label_type = %label_type,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying extraction request"
                );
            })
            .await?;

        let fields = sanitize::parse_fields(&raw)?;

        let missing = fields.missing_keys(label_type);
        if !missing.is_empty() {
            warn!("Response for {} label lacks keys: {}", label_type, missing.join(", "));
        }
        debug!("Extracted {} fields for {} label", fields.len(), label_type);
        Ok(fields)
    }
}
