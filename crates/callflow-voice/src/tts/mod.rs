//! Text-to-speech adapters.
//!
//! Synthesis is streaming: [`TtsAdapter::synthesize`] returns as soon as the
//! provider has accepted the request, and audio arrives through the returned
//! [`AudioStream`]. Dropping the stream must abandon the request so barge-in
//! can stop playback mid-sentence.

mod http;
mod piper;

pub use http::HttpTts;
pub use piper::PiperTts;

use crate::audio::AudioStream;
use crate::error::VoiceError;
use async_trait::async_trait;

/// Maximum text input size for one synthesis request (64 KiB).
pub(crate) const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

#[async_trait]
pub trait TtsAdapter: Send + Sync {
    /// Prepares the provider for the call. Failure is fatal to pipeline start.
    async fn initialize(&self) -> Result<(), VoiceError>;

    /// Starts synthesizing `text`.
    async fn synthesize(&self, text: &str) -> Result<AudioStream, VoiceError>;

    /// Releases provider resources. Safe to call more than once.
    async fn close(&self);
}

pub(crate) fn check_input_size(text: &str) -> Result<(), VoiceError> {
    if text.len() > MAX_TTS_INPUT_BYTES {
        return Err(VoiceError::Tts(format!(
            "text exceeds maximum size: {} bytes (limit: {} bytes)",
            text.len(),
            MAX_TTS_INPUT_BYTES
        )));
    }
    Ok(())
}
