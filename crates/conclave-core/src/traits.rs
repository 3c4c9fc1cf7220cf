use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// LLM client: the capability port task nodes invoke.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;

    /// Run a request to completion and return its text.
    ///
    /// Only text parts are kept, concatenated in arrival order with no
    /// separator; thinking, usage and stop parts are dropped.
    fn generate(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();
        Box::pin(async move {
            let mut stream = self.chat_stream(&config, messages).await?;
            let mut text = String::new();
            while let Some(delta) = stream.next().await {
                if let StreamDelta::TextDelta(part) = delta? {
                    text.push_str(&part);
                }
            }
            Ok(text)
        })
    }
}

/// Structured-fact collaborator for temporal fields.
///
/// Called synchronously while a task node builds its message list.
pub trait FactProvider: Send + Sync + 'static {
    /// Describe `raw_value` of the field labelled `label`.
    fn compute_fact(&self, label: &str, raw_value: &str) -> String;
}
