//! Chat-provider trait implemented by the wire client and by test doubles.

use std::time::Duration;

use async_trait::async_trait;

use hermes_domain::chat::{Message, ToolDefinition};

use crate::client::{ChatOutcome, ModelClient, ModelError};

/// The one contract the core knows about model providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// One chat completion with the given deadline.
    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
        timeout: Duration,
    ) -> Result<ChatOutcome, ModelError>;

    /// Availability probe.
    async fn health(&self, model: &str) -> bool;
}

#[async_trait]
impl ChatProvider for ModelClient {
    async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
        timeout: Duration,
    ) -> Result<ChatOutcome, ModelError> {
        ModelClient::chat(self, messages, model, tools, timeout).await
    }

    async fn health(&self, model: &str) -> bool {
        ModelClient::health(self, model).await
    }
}
