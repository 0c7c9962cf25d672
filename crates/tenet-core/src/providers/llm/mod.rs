use crate::errors::CompletionError;
use crate::prompt::Payload;
use async_trait::async_trait;
use serde::Serialize;

pub mod fake;
pub mod openai;
pub mod tracing;

pub use self::tracing::TracingClient;
pub use fake::FakeClient;
pub use openai::{OpenAiClient, OpenAiConfig};

/// Text returned by one completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub text: String,
    pub provider: String,
    pub model: String,
    /// Provider-specific extras such as token usage.
    pub meta: serde_json::Value,
}

/// The only suspension point of a run. Implementations must be safe to call
/// concurrently from several workers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, payload: &Payload) -> Result<Completion, CompletionError>;
    fn provider_name(&self) -> &'static str;
    fn model(&self) -> &str;
}
