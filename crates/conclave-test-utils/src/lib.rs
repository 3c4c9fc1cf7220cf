//! Test doubles and fixtures shared by the Conclave crates.

use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};

use conclave_core::config::{AppConfig, ModelConfig};
use conclave_core::error::{ConclaveError, Result};
use conclave_core::traits::LlmClient;
use conclave_core::types::{ChatMessage, Notification, Role, StopReason, StreamDelta, TaskDescriptor};

/// What the mock does for one call.
#[derive(Debug, Clone, Default)]
pub struct Script {
    parts: Vec<String>,
    thinking: Option<String>,
    delay: Duration,
    error: Option<String>,
}

impl Script {
    /// Reply with `text` as a single delta.
    pub fn text(text: impl Into<String>) -> Self {
        Self::parts([text.into()])
    }

    /// Reply with several text deltas.
    pub fn parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Fail the request with `LlmRequest(message)`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Never answer within any reasonable timeout.
    pub fn hang() -> Self {
        Self::text("too late").delayed(Duration::from_secs(3600))
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Prefix the reply with a reasoning delta.
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
}

impl RecordedCall {
    pub fn system_prompt(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(ChatMessage::text)
            .collect()
    }
}

/// Scripted `LlmClient`. The first rule whose needle occurs in the
/// request's system prompt decides the reply; otherwise the default runs.
pub struct MockLlm {
    rules: Vec<(String, Script)>,
    default: Script,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            rules: vec![],
            default: Script::text(""),
            calls: Mutex::new(vec![]),
        }
    }

    pub fn on(mut self, system_prompt_contains: impl Into<String>, script: Script) -> Self {
        self.rules.push((system_prompt_contains.into(), script));
        self
    }

    pub fn otherwise(mut self, script: Script) -> Self {
        self.default = script;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls whose system prompt contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.system_prompt().contains(needle))
            .collect()
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmClient for MockLlm {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let call = RecordedCall {
            model_id: config.model_id.clone(),
            messages,
        };
        let system = call.system_prompt();
        let script = self
            .rules
            .iter()
            .find(|(needle, _)| system.contains(needle.as_str()))
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| self.default.clone());
        self.calls.lock().unwrap().push(call);

        Box::pin(async move {
            if !script.delay.is_zero() {
                tokio::time::sleep(script.delay).await;
            }
            if let Some(message) = script.error {
                return Err(ConclaveError::LlmRequest(message));
            }

            let mut deltas: Vec<Result<StreamDelta>> = Vec::new();
            deltas.push(Ok(StreamDelta::MessageId("mock-msg".into())));
            if let Some(thinking) = script.thinking {
                deltas.push(Ok(StreamDelta::ThinkingDelta(thinking)));
            }
            deltas.extend(script.parts.into_iter().map(|p| Ok(StreamDelta::TextDelta(p))));
            deltas.push(Ok(StreamDelta::Usage {
                input_tokens: 10,
                output_tokens: 5,
            }));
            deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));

            Ok(futures::stream::iter(deltas).boxed())
        })
    }
}

/// A descriptor whose system prompt is `"prompt-{id}"`, so mock rules can
/// target it.
pub fn descriptor(id: &str, display_name: &str) -> TaskDescriptor {
    TaskDescriptor::new(id, display_name, format!("prompt-{}", id))
}

/// Config with a mock model and small timeouts.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::new(ModelConfig::new("mock", "mock-fast"));
    config.models.vision = Some(ModelConfig::new("mock", "mock-vision"));
    config.engine.task_timeout_secs = 2;
    config.engine.synthesis_timeout_secs = 2;
    config.synthesis.system_prompt = "synthesis-instructions".into();
    config
}

/// Drain a notification stream.
pub async fn collect_notifications<S>(stream: S) -> Vec<Notification>
where
    S: Stream<Item = Notification>,
{
    stream.collect().await
}

/// `task_name`s in order.
pub fn task_names(notifications: &[Notification]) -> Vec<String> {
    notifications.iter().map(|n| n.task_name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_routes_by_system_prompt() {
        let mock = MockLlm::new()
            .on("prompt-a", Script::parts(["report", "-A"]).with_thinking("hmm"))
            .otherwise(Script::failing("nope"));
        let config = ModelConfig::new("mock", "m");

        let text = mock
            .generate(&config, vec![ChatMessage::system("prompt-a"), ChatMessage::user("x")])
            .await
            .unwrap();
        assert_eq!(text, "report-A");

        let err = mock
            .generate(&config, vec![ChatMessage::system("other")])
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::LlmRequest(_)));

        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.calls_matching("prompt-a").len(), 1);
    }
}
