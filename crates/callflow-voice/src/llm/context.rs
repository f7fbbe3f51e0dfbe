use callflow_types::{ChatMessage, ChatRole};
use std::collections::VecDeque;

/// Bounded conversation history for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationContext {
    system_prompt: Option<String>,
    history: VecDeque<ChatMessage>,
    max_messages: usize,
}

impl ConversationContext {
    pub fn new(system_prompt: Option<String>, max_messages: usize) -> Self {
        Self {
            system_prompt,
            history: VecDeque::new(),
            max_messages,
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// History, oldest first. Does not include the system prompt.
    pub fn history(&self) -> impl Iterator<Item = &ChatMessage> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Records one completed exchange, evicting the oldest exchanges once
    /// the history is over capacity.
    pub fn record_exchange(&mut self, utterance: &str, reply: &str) {
        self.history.push_back(ChatMessage::user(utterance));
        self.history.push_back(ChatMessage::assistant(reply));
        self.evict();
    }

    fn evict(&mut self) {
        while self.history.len() > self.max_messages {
            self.history.pop_front();
            // A reply never outlives the utterance it answered.
            while self
                .history
                .front()
                .is_some_and(|message| message.role == ChatRole::Assistant)
            {
                self.history.pop_front();
            }
        }
    }

    /// System prompt, history, then the new utterance: the message list a
    /// chat-style model expects.
    pub fn to_messages(&self, utterance: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage::system(prompt.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(utterance));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_start_with_system_prompt_and_end_with_utterance() {
        let mut ctx = ConversationContext::new(Some("Be brief.".to_string()), 10);
        ctx.record_exchange("Hi", "Hello! How can I help?");
        let messages = ctx.to_messages("What areas do you service?");
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
        assert_eq!(messages[3].content, "What areas do you service?");
    }

    #[test]
    fn history_drops_oldest_exchange_first() {
        let mut ctx = ConversationContext::new(None, 4);
        ctx.record_exchange("one", "1");
        ctx.record_exchange("two", "2");
        ctx.record_exchange("three", "3");
        let contents: Vec<_> = ctx.history().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "2", "three", "3"]);
    }

    #[test]
    fn odd_capacity_never_keeps_orphan_reply() {
        let mut ctx = ConversationContext::new(None, 3);
        ctx.record_exchange("one", "1");
        ctx.record_exchange("two", "2");
        let contents: Vec<_> = ctx.history().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "2"]);
        assert_eq!(ctx.history().next().map(|m| m.role), Some(ChatRole::User));
    }

    #[test]
    fn capacity_below_one_exchange_keeps_nothing() {
        let mut ctx = ConversationContext::new(None, 1);
        ctx.record_exchange("one", "1");
        assert!(ctx.is_empty());
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut ctx = ConversationContext::new(None, 0);
        ctx.record_exchange("one", "1");
        assert!(ctx.is_empty());
        assert_eq!(ctx.to_messages("two").len(), 1);
    }
}
