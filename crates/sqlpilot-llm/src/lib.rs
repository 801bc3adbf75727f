pub mod assistant;
pub mod providers;
pub mod retry;
pub mod streaming;

use sqlpilot_core::config::ModelConfig;
use sqlpilot_core::error::{Result, SqlPilotError};
use sqlpilot_core::traits::LlmClient;

pub use assistant::LlmAssistant;
pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;
pub use streaming::collect_text;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Ok(Box::new(AnthropicClient::new())),
        "openai" | "ollama" | "groq" | "openrouter" | "vllm" | "compatible" => {
            Ok(Box::new(OpenAiClient::new()))
        }
        other => Err(SqlPilotError::UnsupportedProvider(other.to_string())),
    }
}

/// Primary client wrapped with retries and the configured fallback models.
pub fn create_retrying_client(
    primary: &ModelConfig,
    fallbacks: &[ModelConfig],
) -> Result<Box<dyn LlmClient>> {
    let fallbacks = fallbacks
        .iter()
        .map(|fb| Ok((fb.clone(), create_client(fb)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Box::new(RetryingClient::new(
        create_client(primary)?,
        fallbacks,
        primary.retry.clone().unwrap_or_default(),
    )))
}
