use super::{SttAdapter, TranscriptSender};
use crate::audio::{pcm_duration_ms, rms_s16le};
use crate::config::WhisperSttConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use callflow_types::TranscriptEvent;
use std::io::Cursor;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Maximum audio input size for one transcription (10 MiB). Prevents OOM from
/// an utterance that never pauses.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for one whisper process execution.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

/// Utterances queued for transcription before new ones are dropped.
const UTTERANCE_QUEUE: usize = 8;

/// Local transcription through a whisper.cpp binary.
///
/// whisper.cpp is not a streaming recogniser, so this adapter segments the
/// caller's audio itself: frames are buffered while the RMS level says
/// someone is talking, and a trailing pause closes the utterance. Each
/// utterance is transcribed by a single background worker, which keeps the
/// final events in speaking order. Only final events are emitted.
#[derive(Debug)]
pub struct WhisperStt {
    config: WhisperSttConfig,
    session: Mutex<Option<Session>>,
}

#[derive(Debug)]
struct Session {
    endpointer: Endpointer,
    utterances: mpsc::Sender<Vec<u8>>,
    worker: JoinHandle<()>,
}

impl WhisperStt {
    pub fn new(config: WhisperSttConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SttAdapter for WhisperStt {
    async fn connect(&self, events: TranscriptSender) -> Result<(), VoiceError> {
        if !self.config.model_path.exists() {
            return Err(VoiceError::Stt(format!(
                "Model file not found: {:?}",
                self.config.model_path
            )));
        }
        if self.config.binary_path.is_absolute() && !self.config.binary_path.exists() {
            return Err(VoiceError::Stt(format!(
                "whisper binary not found: {:?}",
                self.config.binary_path
            )));
        }
        if self.config.sample_rate == 0 {
            return Err(VoiceError::Config("sample_rate must be positive".to_string()));
        }

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(UTTERANCE_QUEUE);
        let config = self.config.clone();
        let worker = tokio::spawn(async move {
            while let Some(pcm) = rx.recv().await {
                match transcribe(&config, &pcm).await {
                    Ok(text) => {
                        let event = TranscriptEvent::final_text(text, 1.0);
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    // A failed utterance is lost, but the session carries on.
                    Err(e) => warn!(error = %e, "whisper transcription failed"),
                }
            }
        });

        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Session {
                endpointer: Endpointer::new(&self.config),
                utterances: tx,
                worker,
            });
        if let Some(previous) = previous {
            previous.worker.abort();
        }

        info!(model = ?self.config.model_path, "whisper STT ready");
        Ok(())
    }

    async fn send_audio(&self, audio: &[u8]) -> Result<(), VoiceError> {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = guard.as_mut() else {
            return Err(VoiceError::Stt(
                "transcription session is not connected".to_string(),
            ));
        };

        let Some(utterance) = session.endpointer.push(audio) else {
            return Ok(());
        };
        debug!(bytes = utterance.len(), "utterance endpointed");
        match session.utterances.try_send(utterance) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("whisper queue full, dropping utterance");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(VoiceError::Stt(
                "transcription worker has stopped".to_string(),
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
            session.worker.abort();
            info!("whisper STT session closed");
        }
    }
}

/// Energy-based utterance segmentation over s16le mono frames.
#[derive(Debug)]
struct Endpointer {
    sample_rate: u32,
    threshold: f32,
    silence_ms: u64,
    min_speech_ms: u64,
    max_utterance_ms: u64,
    buffer: Vec<u8>,
    in_utterance: bool,
    total_ms: u64,
    speech_ms: u64,
    trailing_silence_ms: u64,
}

impl Endpointer {
    fn new(config: &WhisperSttConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            threshold: config.speech_threshold,
            silence_ms: config.silence_ms,
            min_speech_ms: config.min_speech_ms,
            max_utterance_ms: config.max_utterance_ms,
            buffer: Vec::new(),
            in_utterance: false,
            total_ms: 0,
            speech_ms: 0,
            trailing_silence_ms: 0,
        }
    }

    /// Feeds one frame; returns the buffered utterance once it ends.
    fn push(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let loud = rms_s16le(frame) >= self.threshold;
        if !self.in_utterance {
            if !loud {
                return None;
            }
            self.in_utterance = true;
        }

        let frame_ms = pcm_duration_ms(frame.len(), self.sample_rate);
        self.buffer.extend_from_slice(frame);
        self.total_ms += frame_ms;
        if loud {
            self.speech_ms += frame_ms;
            self.trailing_silence_ms = 0;
        } else {
            self.trailing_silence_ms += frame_ms;
        }

        let paused = self.trailing_silence_ms >= self.silence_ms;
        let too_long =
            self.total_ms >= self.max_utterance_ms || self.buffer.len() >= MAX_STT_INPUT_BYTES;
        if !paused && !too_long {
            return None;
        }

        let enough_speech = self.speech_ms >= self.min_speech_ms;
        let utterance = std::mem::take(&mut self.buffer);
        self.in_utterance = false;
        self.total_ms = 0;
        self.speech_ms = 0;
        self.trailing_silence_ms = 0;
        enough_speech.then_some(utterance)
    }
}

/// Wraps raw PCM in a WAV container, which is what whisper.cpp reads.
fn wav_bytes(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, VoiceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Stt(format!("failed to write WAV header: {}", e)))?;
        for sample in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|e| VoiceError::Stt(format!("failed to write WAV sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Stt(format!("failed to finalize WAV: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

async fn transcribe(config: &WhisperSttConfig, pcm: &[u8]) -> Result<String, VoiceError> {
    if pcm.len() > MAX_STT_INPUT_BYTES {
        return Err(VoiceError::Stt(format!(
            "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
            pcm.len(),
            MAX_STT_INPUT_BYTES
        )));
    }
    let wav = wav_bytes(pcm, config.sample_rate)?;

    let mut command = Command::new(&config.binary_path);
    // -m <model>: GGML model, -f -: read WAV from stdin, -nt: no timestamps
    command
        .arg("-m")
        .arg(&config.model_path)
        .arg("-f")
        .arg("-")
        .arg("-nt")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| VoiceError::Stt(format!("Failed to spawn STT binary: {}", e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| VoiceError::Stt("Failed to open stdin".to_string()))?;

    stdin
        .write_all(&wav)
        .await
        .map_err(|e| VoiceError::Stt(format!("Failed to write to stdin: {}", e)))?;
    drop(stdin); // EOF

    let output = tokio::time::timeout(STT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| VoiceError::Timeout {
            operation: "whisper transcription",
            after: STT_TIMEOUT,
        })?
        .map_err(|e| VoiceError::Stt(format!("Failed to read stdout: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr)));
    }

    Ok(clean_transcript(&String::from_utf8_lossy(&output.stdout)))
}

/// Joins whisper's output lines and drops its non-speech markers.
fn clean_transcript(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_marker(line))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_marker(line: &str) -> bool {
    (line.starts_with('[') && line.ends_with(']')) || (line.starts_with('(') && line.ends_with(')'))
}
