//! Speech-to-text adapters.
//!
//! An adapter owns one streaming transcription session per call. Audio goes in
//! through [`SttAdapter::send_audio`]; transcript events come back, in provider
//! order, through the [`TranscriptSender`] handed to [`SttAdapter::connect`].

mod streaming;
mod whisper;

pub use streaming::StreamingStt;
pub use whisper::WhisperStt;

use crate::error::VoiceError;
use async_trait::async_trait;
use callflow_types::TranscriptEvent;
use tokio::sync::mpsc;

/// Channel on which an adapter delivers transcript events.
pub type TranscriptSender = mpsc::Sender<TranscriptEvent>;

#[async_trait]
pub trait SttAdapter: Send + Sync {
    /// Opens the transcription session.
    ///
    /// Failure means the call cannot proceed; it is not retried.
    async fn connect(&self, events: TranscriptSender) -> Result<(), VoiceError>;

    /// Forwards one frame of caller audio.
    ///
    /// Called for every telephony frame (every ~20 ms), so implementations
    /// must not wait on the provider. Transient problems such as a dropped
    /// frame are handled internally; an error means the session is gone.
    async fn send_audio(&self, audio: &[u8]) -> Result<(), VoiceError>;

    /// Tears the session down. Safe to call more than once.
    async fn close(&self);
}
