use async_trait::async_trait;
use callflow_voice::{AudioChunk, PipelineSink, TranscriptEvent, VoiceError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Writes agent audio to a byte sink (stdout for the binary) and logs what
/// the caller said.
pub struct WriterSink<W> {
    out: Mutex<W>,
}

impl<W> WriterSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl<W> PipelineSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn on_audio_output(&self, chunk: AudioChunk) -> Result<(), VoiceError> {
        let mut out = self.out.lock().await;
        out.write_all(chunk.as_bytes())
            .await
            .map_err(|e| VoiceError::Output(format!("failed to write audio: {}", e)))?;
        out.flush()
            .await
            .map_err(|e| VoiceError::Output(format!("failed to flush audio: {}", e)))
    }

    async fn on_transcript(&self, event: &TranscriptEvent) {
        if event.is_final {
            tracing::info!(
                text = %event.text,
                confidence = event.confidence,
                "caller said"
            );
        } else {
            tracing::debug!(text = %event.text, "partial transcript");
        }
    }
}
