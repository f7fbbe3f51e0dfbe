//! Language-model adapters and the conversation context they read.
//!
//! The pipeline runs the LLM in full-text mode: a turn waits for the complete
//! reply before synthesis starts. Cancellation is cooperative by dropping the
//! `generate_response` future, so adapters must not leave work running in
//! detached tasks.

mod chat;
mod context;

pub use chat::ChatLlm;
pub use context::ConversationContext;

use crate::error::VoiceError;
use async_trait::async_trait;

/// A complete reply from the language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmReply {
    pub text: String,
    /// Completion tokens as reported by the provider, when it reports them.
    pub completion_tokens: Option<u32>,
}

impl LlmReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completion_tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.completion_tokens = Some(tokens);
        self
    }

    /// Provider token count, or a word count when the provider is silent.
    pub fn token_count(&self) -> u64 {
        match self.completion_tokens {
            Some(tokens) => u64::from(tokens),
            None => self.text.split_whitespace().count() as u64,
        }
    }
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Produces the agent's reply to `utterance` given the prior conversation.
    ///
    /// `context` holds the history before this utterance; the utterance itself
    /// is passed separately.
    async fn generate_response(
        &self,
        utterance: &str,
        context: &ConversationContext,
    ) -> Result<LlmReply, VoiceError>;
}
