use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sqlpilot_core::config::ModelConfig;
use sqlpilot_core::error::{Result, SqlPilotError};
use sqlpilot_core::traits::LlmClient;
use sqlpilot_core::types::*;

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
    content: String,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseData {
    MessageStart { message: MessageInfo },
    ContentBlockStart {},
    ContentBlockDelta { delta: DeltaInfo },
    ContentBlockStop {},
    MessageDelta {
        delta: MessageDeltaInfo,
        #[serde(default)]
        usage: Option<UsageInfo>,
    },
    MessageStop {},
    Ping {},
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
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaInfo {
    TextDelta { text: String },
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

/// Anthropic takes the system prompt out of band; several system
/// messages are joined into one.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Vec<String> = Vec::new();
    let mut api_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system.push(msg.content),
            Role::User => api_msgs.push(ApiMessage {
                role: "user",
                content: msg.content,
            }),
            Role::Assistant => api_msgs.push(ApiMessage {
                role: "assistant",
                content: msg.content,
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

fn parse_sse_to_deltas(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.is_done() {
        return vec![];
    }

    let data: SseData = match serde_json::from_str(&event.data) {
        Ok(data) => data,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE data");
            return vec![];
        }
    };

    match data {
        SseData::MessageStart { message } => vec![Ok(StreamDelta::MessageId(message.id))],
        SseData::ContentBlockDelta {
            delta: DeltaInfo::TextDelta { text },
        } => vec![Ok(StreamDelta::TextDelta(text))],
        SseData::MessageDelta { delta, usage } => {
            let mut out = Vec::new();
            if let Some(usage) = usage {
                debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Token usage"
                );
                out.push(Ok(StreamDelta::Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                }));
            }
            let stop = match delta.stop_reason.as_deref() {
                Some("end_turn") => Some(StopReason::EndTurn),
                Some("max_tokens") => Some(StopReason::MaxTokens),
                Some("stop_sequence") => Some(StopReason::StopSequence),
                _ => None,
            };
            if let Some(stop) = stop {
                out.push(Ok(StreamDelta::Stop(stop)));
            }
            out
        }
        SseData::Error { error } => vec![Err(SqlPilotError::LlmStream(error.message))],
        SseData::ContentBlockDelta {
            delta: DeltaInfo::Other,
        }
        | SseData::ContentBlockStart {}
        | SseData::ContentBlockStop {}
        | SseData::MessageStop {}
        | SseData::Ping {} => vec![],
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
                .ok_or_else(|| SqlPilotError::Config("Anthropic API key not set".into()))?;

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
                .map_err(|e| SqlPilotError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(SqlPilotError::LlmRequest(format!(
                    "HTTP {}: {}",
                    status, body
                )));
            }

            let delta_stream = SseStream::new(response.bytes_stream())
                .map(|event| futures::stream::iter(parse_sse_to_deltas(event)))
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
    fn test_system_prompt_out_of_band() {
        let (system, msgs) = convert_messages(vec![
            ChatMessage::system("rules"),
            ChatMessage::system("schema"),
            ChatMessage::user("question"),
        ]);
        assert_eq!(system.as_deref(), Some("rules\n\nschema"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "user");
    }

    #[test]
    fn test_parse_text_delta() {
        let deltas = parse_sse_to_deltas(event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"SELECT"}}"#,
        ));
        assert!(matches!(deltas[0], Ok(StreamDelta::TextDelta(ref t)) if t == "SELECT"));
    }

    #[test]
    fn test_parse_message_delta_with_usage() {
        let deltas = parse_sse_to_deltas(event(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":12}}"#,
        ));
        assert_eq!(deltas.len(), 2);
        assert!(matches!(deltas[1], Ok(StreamDelta::Stop(StopReason::EndTurn))));
    }

    #[test]
    fn test_parse_error_event() {
        let deltas = parse_sse_to_deltas(event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        assert!(matches!(deltas[0], Err(SqlPilotError::LlmStream(ref m)) if m == "Overloaded"));
    }

    #[test]
    fn test_parse_ping_ignored() {
        assert!(parse_sse_to_deltas(event(r#"{"type":"ping"}"#)).is_empty());
    }
}
