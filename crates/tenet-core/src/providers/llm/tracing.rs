use super::{Completion, CompletionClient};
use crate::errors::CompletionError;
use crate::prompt::Payload;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info_span, Instrument};

/// Wraps every completion call in an `info` span. Prompt text and
/// credentials are never recorded, only identifiers and the fingerprint.
pub struct TracingClient {
    inner: Arc<dyn CompletionClient>,
}

impl TracingClient {
    pub fn new(inner: Arc<dyn CompletionClient>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CompletionClient for TracingClient {
    async fn complete(&self, payload: &Payload) -> Result<Completion, CompletionError> {
        let span = info_span!(
            "completion",
            provider = self.inner.provider_name(),
            model = self.inner.model(),
            scenario_id = payload.scenario_id.as_str(),
            case_id = payload.case_id.as_str(),
            fingerprint = &payload.fingerprint[..payload.fingerprint.len().min(12)],
            duration_ms = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        async move {
            let start = std::time::Instant::now();
            let result = self.inner.complete(payload).await;
            let span = tracing::Span::current();
            span.record("duration_ms", start.elapsed().as_millis() as u64);
            if let Err(e) = &result {
                span.record("error", e.to_string().as_str());
                tracing::debug!(error = %e, retryable = e.is_retryable(), "completion failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}
