use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use conclave_core::config::ModelConfig;
use conclave_core::error::{ConclaveError, Result};
use conclave_core::traits::LlmClient;
use conclave_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Serialize, Debug)]
struct ApiMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
#[allow(dead_code)]
enum SseData {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageInfo },
    #[serde(rename = "content_block_start")]
    ContentBlockStart { index: usize },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: usize, delta: DeltaInfo },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: usize },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaInfo,
        usage: Option<UsageInfo>,
    },
    #[serde(rename = "message_stop")]
    MessageStop {},
    #[serde(rename = "ping")]
    Ping {},
    #[serde(rename = "error")]
    Error { error: ApiError },
}

#[derive(Deserialize, Debug)]
struct MessageInfo {
    id: String,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum DeltaInfo {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// Split out the system prompt and fold consecutive same-role messages
/// into one, since task nodes send each input field as its own user turn.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Vec<String> = Vec::new();
    let mut api_msgs: Vec<ApiMessage> = Vec::new();

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                system.push(msg.text());
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let blocks: Vec<Value> = msg.content.iter().filter_map(convert_block).collect();
        match api_msgs.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => api_msgs.push(ApiMessage {
                role,
                content: blocks,
            }),
        }
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, api_msgs)
}

fn convert_block(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
        ContentBlock::Image { media_type, data } => Some(json!({
            "type": "image",
            "source": { "type": "base64", "media_type": media_type, "data": data },
        })),
        // Unsigned thinking blocks are rejected on input
        ContentBlock::Thinking { .. } => None,
    }
}

fn parse_sse_to_delta(event: SseEvent) -> Option<Result<StreamDelta>> {
    let data: SseData = match serde_json::from_str(&event.data) {
        Ok(data) => data,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE data");
            return None;
        }
    };

    match data {
        SseData::MessageStart { message } => Some(Ok(StreamDelta::MessageId(message.id))),
        SseData::ContentBlockDelta { delta, .. } => match delta {
            DeltaInfo::TextDelta { text } => Some(Ok(StreamDelta::TextDelta(text))),
            DeltaInfo::ThinkingDelta { thinking } => Some(Ok(StreamDelta::ThinkingDelta(thinking))),
            DeltaInfo::Other => None,
        },
        SseData::MessageDelta { delta, usage } => {
            if let Some(usage) = usage {
                debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Token usage"
                );
            }
            let stop = match delta.stop_reason.as_deref() {
                Some("max_tokens") => StopReason::MaxTokens,
                Some("stop_sequence") => StopReason::StopSequence,
                Some(_) => StopReason::EndTurn,
                None => return None,
            };
            Some(Ok(StreamDelta::Stop(stop)))
        }
        SseData::Error { error } => Some(Err(ConclaveError::LlmStream(error.message))),
        SseData::ContentBlockStart { .. }
        | SseData::ContentBlockStop { .. }
        | SseData::MessageStop {}
        | SseData::Ping {} => None,
    }
}

impl LlmClient for AnthropicClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| ConclaveError::Config("Anthropic API key not set".into()))?;

            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
            let (system, api_messages) = convert_messages(messages);

            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                messages: api_messages,
                system,
                stream: true,
            };

            let mut req = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json");
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .json(&body)
                .send()
                .await
                .map_err(|e| ConclaveError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(ConclaveError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let sse_stream = SseStream::new(response.bytes_stream());
            let delta_stream = sse_stream.filter_map(|event| async move {
                match event {
                    Ok(event) => parse_sse_to_delta(event),
                    Err(e) => Some(Err(e)),
                }
            });

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
    fn test_system_split_and_user_turns_merged() {
        let (system, msgs) = convert_messages(vec![
            ChatMessage::system("You read palms."),
            ChatMessage::user("Palm photo:"),
            ChatMessage::user_image("image/jpeg", "QUJD"),
        ]);
        assert_eq!(system.as_deref(), Some("You read palms."));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content.len(), 2);
        assert_eq!(msgs[0].content[1]["type"], "image");
        assert_eq!(msgs[0].content[1]["source"]["data"], "QUJD");
    }

    #[test]
    fn test_parse_deltas() {
        let d = parse_sse_to_delta(event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        ));
        assert!(matches!(d, Some(Ok(StreamDelta::TextDelta(t))) if t == "Hi"));

        let d = parse_sse_to_delta(event(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
        ));
        assert!(matches!(d, Some(Ok(StreamDelta::Stop(StopReason::EndTurn)))));

        let d = parse_sse_to_delta(event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        assert!(matches!(d, Some(Err(ConclaveError::LlmStream(_)))));

        assert!(parse_sse_to_delta(event(r#"{"type":"ping"}"#)).is_none());
    }
}
