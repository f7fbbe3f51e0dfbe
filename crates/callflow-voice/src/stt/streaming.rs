use super::{SttAdapter, TranscriptSender};
use crate::config::StreamingSttConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use callflow_types::TranscriptEvent;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const KEEPALIVE_MESSAGE: &str = r#"{"type":"KeepAlive"}"#;
const CLOSE_STREAM_MESSAGE: &str = r#"{"type":"CloseStream"}"#;

/// How long `close()` waits for the provider to flush its last results.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Streaming transcription over a WebSocket.
///
/// Audio frames are queued to a writer task so `send_audio` never waits on
/// the network; a reader task turns provider result messages into
/// [`TranscriptEvent`]s.
#[derive(Debug)]
pub struct StreamingStt {
    config: StreamingSttConfig,
    session: Mutex<Option<Session>>,
}

#[derive(Debug)]
struct Session {
    audio_tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl StreamingStt {
    pub fn new(config: StreamingSttConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Builds the provider URL with the audio format as query parameters.
    fn endpoint(&self) -> Result<reqwest::Url, VoiceError> {
        if self.config.url.is_empty() {
            return Err(VoiceError::Config(
                "streaming STT url is not configured".to_string(),
            ));
        }

        let mut params = vec![
            ("encoding", self.config.encoding.clone()),
            ("sample_rate", self.config.sample_rate.to_string()),
            ("channels", self.config.channels.to_string()),
            ("interim_results", self.config.interim_results.to_string()),
        ];
        if let Some(model) = &self.config.model {
            params.push(("model", model.clone()));
        }
        if let Some(language) = &self.config.language {
            params.push(("language", language.clone()));
        }

        reqwest::Url::parse_with_params(&self.config.url, &params)
            .map_err(|e| VoiceError::Config(format!("invalid streaming STT url: {}", e)))
    }
}

#[async_trait]
impl SttAdapter for StreamingStt {
    async fn connect(&self, events: TranscriptSender) -> Result<(), VoiceError> {
        let url = self.endpoint()?;
        let mut request = url.as_str().into_client_request()?;
        if !self.config.api_key.is_empty() {
            let value = format!("{} {}", self.config.auth_scheme, self.config.api_key);
            let header = HeaderValue::from_str(&value)
                .map_err(|e| VoiceError::Config(format!("invalid STT api key: {}", e)))?;
            request.headers_mut().insert("Authorization", header);
        }

        info!(host = url.host_str().unwrap_or(""), "connecting to streaming STT");
        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::Stt(format!("failed to connect to {}: {}", url, e)))?;
        let (mut ws_tx, mut ws_rx) = socket.split();

        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(self.config.send_queue_frames.max(1));
        let cancel = CancellationToken::new();
        let keepalive = Duration::from_millis(self.config.keepalive_interval_ms.max(1));

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keepalive);
            let mut last_write = Instant::now();
            loop {
                tokio::select! {
                    biased;
                    () = writer_cancel.cancelled() => break,
                    frame = audio_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = ws_tx.send(Message::binary(frame)).await {
                            warn!(error = %e, "failed to write audio to STT socket");
                            break;
                        }
                        last_write = Instant::now();
                    }
                    _ = ticker.tick() => {
                        if last_write.elapsed() >= keepalive {
                            if let Err(e) = ws_tx.send(Message::text(KEEPALIVE_MESSAGE)).await {
                                warn!(error = %e, "failed to send STT keep-alive");
                                break;
                            }
                            last_write = Instant::now();
                        }
                    }
                }
            }
            let _ = ws_tx.send(Message::text(CLOSE_STREAM_MESSAGE)).await;
            let _ = ws_tx.close().await;
            writer_cancel.cancel();
        });

        let reader_cancel = cancel.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(Message::Text(text)) => match parse_result(text.as_str()) {
                        Ok(Some(event)) => {
                            if events.send(event).await.is_err() {
                                debug!("transcript receiver dropped, stopping STT reader");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "unparseable STT message"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "STT provider closed the stream");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "STT socket failed");
                        break;
                    }
                }
            }
            // Stops the writer so later `send_audio` calls report a dead session.
            reader_cancel.cancel();
        });

        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Session {
                audio_tx,
                cancel,
                writer,
                reader,
            });
        if let Some(previous) = previous {
            warn!("replacing an existing STT session");
            previous.shutdown().await;
        }

        Ok(())
    }

    async fn send_audio(&self, audio: &[u8]) -> Result<(), VoiceError> {
        let guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = guard.as_ref() else {
            return Err(VoiceError::Stt(
                "transcription session is not connected".to_string(),
            ));
        };

        match session.audio_tx.try_send(audio.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(bytes = audio.len(), "STT send queue full, dropping audio frame");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(VoiceError::Stt(
                "transcription session has closed".to_string(),
            )),
        }
    }

    async fn close(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.shutdown().await;
            info!("streaming STT session closed");
        }
    }
}

impl Session {
    async fn shutdown(self) {
        let Session {
            audio_tx,
            cancel,
            mut writer,
            mut reader,
        } = self;
        // Closing the queue lets the writer drain it and send CloseStream.
        drop(audio_tx);
        if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
            cancel.cancel();
            writer.abort();
        }
        // Give the provider a moment to flush final results before giving up.
        if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
        cancel.cancel();
    }
}

#[derive(Debug, Deserialize)]
struct ProviderMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    channel: Option<ProviderChannel>,
}

#[derive(Debug, Deserialize)]
struct ProviderChannel {
    #[serde(default)]
    alternatives: Vec<ProviderAlternative>,
}

#[derive(Debug, Deserialize)]
struct ProviderAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Parses one provider text message.
///
/// Returns `None` for non-result messages (metadata, speech-started, ...)
/// and for empty partial results, which carry nothing worth surfacing.
fn parse_result(text: &str) -> Result<Option<TranscriptEvent>, serde_json::Error> {
    let message: ProviderMessage = serde_json::from_str(text)?;
    if message.kind.as_deref().is_some_and(|kind| kind != "Results") {
        return Ok(None);
    }

    let Some(best) = message
        .channel
        .and_then(|channel| channel.alternatives.into_iter().next())
    else {
        return Ok(None);
    };

    if !message.is_final && best.transcript.trim().is_empty() {
        return Ok(None);
    }

    Ok(Some(TranscriptEvent::new(
        best.transcript,
        message.is_final,
        best.confidence,
    )))
}
