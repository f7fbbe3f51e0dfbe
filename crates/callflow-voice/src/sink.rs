use crate::audio::AudioChunk;
use crate::error::VoiceError;
use async_trait::async_trait;
use callflow_types::TranscriptEvent;

/// The single subscriber a pipeline reports to.
///
/// Set once at construction. `on_audio_output` is awaited for every outgoing
/// chunk in generation order, so a slow sink applies backpressure to the
/// synthesizer. An error from it ends the current turn.
#[async_trait]
pub trait PipelineSink: Send + Sync {
    async fn on_audio_output(&self, chunk: AudioChunk) -> Result<(), VoiceError>;

    /// Every STT event, partial and final, in provider order.
    async fn on_transcript(&self, _event: &TranscriptEvent) {}
}
