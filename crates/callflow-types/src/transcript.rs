//! Transcript events emitted by speech-to-text providers.

use serde::{Deserialize, Serialize};

/// A single transcription result from the STT provider.
///
/// Providers emit many partial events per final event. Partial events are
/// advisory (live captions); only a final event with real text starts a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// The transcribed text.
    pub text: String,
    /// Whether the provider considers this utterance complete.
    pub is_final: bool,
    /// Provider confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>, is_final: bool, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final,
            confidence,
        }
    }

    /// Shorthand for a final event.
    pub fn final_text(text: impl Into<String>, confidence: f32) -> Self {
        Self::new(text, true, confidence)
    }

    /// Shorthand for a partial (interim) event.
    pub fn partial(text: impl Into<String>, confidence: f32) -> Self {
        Self::new(text, false, confidence)
    }

    /// Returns the trimmed utterance if this event may start a turn.
    ///
    /// Partial events and final events whose text is empty or whitespace-only
    /// never start a turn.
    pub fn utterance(&self) -> Option<&str> {
        if !self.is_final {
            return None;
        }
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_event_with_text_is_an_utterance() {
        let event = TranscriptEvent::final_text("  What areas do you service?  ", 0.95);
        assert_eq!(event.utterance(), Some("What areas do you service?"));
    }

    #[test]
    fn partial_event_is_never_an_utterance() {
        let event = TranscriptEvent::partial("What areas", 0.6);
        assert_eq!(event.utterance(), None);
    }

    #[test]
    fn blank_final_event_is_not_an_utterance() {
        assert_eq!(TranscriptEvent::final_text("", 0.9).utterance(), None);
        assert_eq!(TranscriptEvent::final_text(" \t\n ", 0.9).utterance(), None);
    }

    #[test]
    fn serializes_with_plain_field_names() {
        let event = TranscriptEvent::final_text("hello", 0.5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["is_final"], true);
    }
}
