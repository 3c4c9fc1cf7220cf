pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use conclave_core::config::ModelConfig;
use conclave_core::traits::LlmClient;

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name, wrapped in a
/// `RetryingClient` when the model has a `[retry]` section.
pub fn create_client(config: &ModelConfig) -> Arc<dyn LlmClient> {
    let client: Box<dyn LlmClient> = match config.provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicClient::new()),
        // Everything else uses the OpenAI-compatible client
        _ => Box::new(OpenAiClient::new()),
    };
    match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(client, retry.clone())),
        None => Arc::from(client),
    }
}
