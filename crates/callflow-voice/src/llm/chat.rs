use super::{ConversationContext, LlmAdapter, LlmReply};
use crate::config::ChatLlmConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use callflow_types::ChatMessage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct ChatLlm {
    config: ChatLlmConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    completion_tokens: Option<u32>,
}

impl ChatLlm {
    pub fn new(config: ChatLlmConfig) -> Result<Self, VoiceError> {
        if config.url.is_empty() {
            return Err(VoiceError::Config("LLM url is not configured".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmAdapter for ChatLlm {
    async fn generate_response(
        &self,
        utterance: &str,
        context: &ConversationContext,
    ) -> Result<LlmReply, VoiceError> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages: context.to_messages(utterance),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let mut request = self.client.post(self.endpoint()).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VoiceError::Timeout {
                    operation: "LLM request",
                    after: Duration::from_millis(self.config.timeout_ms),
                }
            } else {
                VoiceError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Llm(format!(
                "completion request failed with {}: {}",
                status,
                detail.trim()
            )));
        }

        let parsed: CompletionResponse = response.json().await?;
        let reply = parse_completion(parsed)?;
        debug!(
            chars = reply.text.len(),
            completion_tokens = ?reply.completion_tokens,
            "LLM reply received"
        );
        Ok(reply)
    }
}

fn parse_completion(response: CompletionResponse) -> Result<LlmReply, VoiceError> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| VoiceError::Llm("completion contained no message".to_string()))?;

    Ok(LlmReply {
        text: text.trim().to_string(),
        completion_tokens: response.usage.and_then(|u| u.completion_tokens),
    })
}
