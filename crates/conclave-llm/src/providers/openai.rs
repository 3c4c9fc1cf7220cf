use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use conclave_core::config::ModelConfig;
use conclave_core::error::{ConclaveError, Result};
use conclave_core::traits::LlmClient;
use conclave_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: &'static str,
    content: Value,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Map chat messages onto the chat-completions wire shape.
///
/// Text-only messages use a plain string body; messages with media use
/// the content-part array with `image_url` data URLs.
pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content = if msg.has_image() {
                Value::Array(msg.content.iter().filter_map(content_part).collect())
            } else {
                Value::String(msg.text())
            };
            OaiMessage { role, content }
        })
        .collect()
}

fn content_part(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
        ContentBlock::Image { media_type, data } => Some(json!({
            "type": "image_url",
            "image_url": { "url": ContentBlock::data_url(media_type, data) },
        })),
        ContentBlock::Thinking { .. } => None,
    }
}

pub(crate) fn parse_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let chunk: StreamChunk = match serde_json::from_str(&event.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse OpenAI SSE chunk");
            return vec![];
        }
    };

    let mut deltas = Vec::new();
    for choice in chunk.choices.into_iter().take(1) {
        if let Some(delta) = choice.delta {
            if let Some(thinking) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                deltas.push(Ok(StreamDelta::ThinkingDelta(thinking)));
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                deltas.push(Ok(StreamDelta::TextDelta(text)));
            }
        }
        if let Some(reason) = choice.finish_reason {
            let stop = match reason.as_str() {
                "length" => StopReason::MaxTokens,
                _ => StopReason::EndTurn,
            };
            deltas.push(Ok(StreamDelta::Stop(stop)));
        }
    }
    if let Some(usage) = chunk.usage {
        deltas.push(Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }
    deltas
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            // o-series models reject an explicit temperature
            let is_o_series = ["o1", "o3", "o4"]
                .iter()
                .any(|p| config.model_id.starts_with(p));

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: if is_o_series {
                    None
                } else {
                    Some(config.temperature)
                },
                stream: true,
            };

            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| ConclaveError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(ConclaveError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let sse_stream = SseStream::new(response.bytes_stream());
            let delta_stream = sse_stream
                .map(|event| match event {
                    Ok(event) => futures::stream::iter(parse_chunk(event)),
                    Err(e) => futures::stream::iter(vec![Err(e)]),
                })
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_text_message_is_plain_string() {
        let msgs = convert_messages(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("Name: Ada"),
        ]);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[0].content, json!("be brief"));
        assert_eq!(msgs[1].content, json!("Name: Ada"));
    }

    #[test]
    fn test_image_message_uses_data_url_part() {
        let msgs = convert_messages(vec![ChatMessage::user_image("image/jpeg", "QUJD")]);
        assert_eq!(
            msgs[0].content,
            json!([{ "type": "image_url", "image_url": { "url": "data:image/jpeg;base64,QUJD" } }])
        );
    }

    #[test]
    fn test_parse_text_and_stop() {
        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#,
        ));
        assert!(matches!(&deltas[0], Ok(StreamDelta::TextDelta(t)) if t == "Hi"));

        let deltas = parse_chunk(event(r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#));
        assert!(matches!(&deltas[0], Ok(StreamDelta::Stop(StopReason::MaxTokens))));

        assert!(parse_chunk(event("[DONE]")).is_empty());
        assert!(parse_chunk(event("not json")).is_empty());
    }
}
